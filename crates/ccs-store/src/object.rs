//! Memoizable objects and the control-flow graph encoding.
//!
//! A graph is stored as a single `PACKED_HOMOGENOUS_DATA` record whose
//! descriptor is [`GRAPH_DTYPE`]. Its bytes are a nested record stream with
//! stream-local identifiers: members are defined before the tuples that
//! reference them, the graph's root tuple is the last record, and the
//! end-of-stream sentinel closes it. Strings repeated across blocks are
//! written once and shared by reference.
//!
//! References from a graph to other store objects (see
//! [`NodeBody::Subgraphs`]) are kept as store-level identifiers inside an
//! integer list. They are not resolved when the graph is decoded.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ccs_codec::{writer, CodecResult, ObjectRegistry, Primitive, RecordReader, Value};
use ccs_types::ObjectIdentifier;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Packed-data descriptor marking an encoded control-flow graph.
pub const GRAPH_DTYPE: &str = "ccs.cfg/1";

const JUMP: i64 = 0;
const BRANCH: i64 = 1;
const APPLY: i64 = 2;
const FINISH: i64 = 3;
const SUBGRAPHS: i64 = 4;

/// A compiled function body: labelled blocks plus the label control enters at.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowGraph {
    pub name: String,
    /// Label of the entry block.
    pub entry: String,
    pub blocks: BTreeMap<String, ControlFlowNode>,
}

/// One basic block. Arguments are referred to by position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlFlowNode {
    pub arg_count: u32,
    pub body: NodeBody,
}

/// How a block transfers control.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeBody {
    Jump {
        target: String,
        args: Vec<u32>,
    },
    Branch {
        condition: u32,
        if_true: String,
        if_false: String,
    },
    /// Call `callee` with the given arguments, then continue at `next`.
    Apply {
        callee: Primitive,
        args: Vec<u32>,
        next: String,
    },
    /// Return `arg`, or raise it when `is_exception` is set.
    Finish {
        arg: u32,
        is_exception: bool,
    },
    /// Inline other stored graphs, then continue at `next`.
    Subgraphs {
        members: Vec<ObjectIdentifier>,
        next: String,
    },
}

impl ControlFlowNode {
    pub fn new(arg_count: u32, body: NodeBody) -> Self {
        Self { arg_count, body }
    }
}

impl ControlFlowGraph {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            blocks: BTreeMap::new(),
        }
    }

    /// Builder-style block insertion.
    pub fn with_block(mut self, label: impl Into<String>, node: ControlFlowNode) -> Self {
        self.blocks.insert(label.into(), node);
        self
    }

    pub fn block(&self, label: &str) -> Option<&ControlFlowNode> {
        self.blocks.get(label)
    }

    pub fn entry_block(&self) -> Option<&ControlFlowNode> {
        self.blocks.get(&self.entry)
    }

    /// Store objects this graph refers to, sorted and without duplicates.
    pub fn referenced_objects(&self) -> Vec<ObjectIdentifier> {
        let mut ids = BTreeSet::new();
        for node in self.blocks.values() {
            if let NodeBody::Subgraphs { members, .. } = &node.body {
                ids.extend(members.iter().copied());
            }
        }
        ids.into_iter().collect()
    }

    /// Encode as a nested record stream.
    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        let mut writer = GraphWriter::default();
        let name = writer.string(&self.name)?;
        let entry = writer.string(&self.entry)?;
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for (label, node) in &self.blocks {
            blocks.push(writer.node(label, node)?);
        }
        let blocks = writer.tuple(&blocks)?;
        writer.tuple(&[name, entry, blocks])?;
        writer.registry.define_end_of_stream();
        Ok(writer.registry.into_bytes())
    }

    /// Decode a nested record stream produced by [`encode`](Self::encode).
    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        let (reader, root) = GraphReader::parse(bytes)?;
        let &[name, entry, blocks] = reader.tuple(root)? else {
            return Err(malformed("graph root must have three members"));
        };
        let mut graph = ControlFlowGraph::new(reader.string(name)?, reader.string(entry)?);
        for &block in reader.tuple(blocks)? {
            let (label, node) = reader.node(block)?;
            if graph.blocks.insert(label.clone(), node).is_some() {
                return Err(malformed(format!("duplicate block label {label:?}")));
            }
        }
        Ok(graph)
    }
}

fn malformed(reason: impl Into<String>) -> StoreError {
    StoreError::MalformedGraph(reason.into())
}

#[derive(Default)]
struct GraphWriter {
    registry: ObjectRegistry,
    strings: HashMap<String, ObjectIdentifier>,
}

impl GraphWriter {
    fn primitive(&mut self, value: &Primitive) -> CodecResult<ObjectIdentifier> {
        let id = self.registry.allocate_object();
        self.registry.define_primitive(id, value)?;
        Ok(id)
    }

    fn string(&mut self, s: &str) -> CodecResult<ObjectIdentifier> {
        if let Some(id) = self.strings.get(s) {
            return Ok(*id);
        }
        let id = self.primitive(&Primitive::from(s))?;
        self.strings.insert(s.to_owned(), id);
        Ok(id)
    }

    fn int(&mut self, value: i64) -> CodecResult<ObjectIdentifier> {
        self.primitive(&Primitive::Int(value))
    }

    fn ints<I>(&mut self, values: I) -> CodecResult<ObjectIdentifier>
    where
        I: IntoIterator<Item = i64>,
    {
        let items: Vec<Primitive> = values.into_iter().map(Primitive::Int).collect();
        let id = self.registry.allocate_object();
        self.registry.define_list_of_primitives(id, &items)?;
        Ok(id)
    }

    fn tuple(&mut self, members: &[ObjectIdentifier]) -> CodecResult<ObjectIdentifier> {
        let id = self.registry.allocate_object();
        self.registry.define_tuple(id, members)?;
        Ok(id)
    }

    fn node(&mut self, label: &str, node: &ControlFlowNode) -> CodecResult<ObjectIdentifier> {
        let label = self.string(label)?;
        let arity = self.int(node.arg_count.into())?;
        let body = self.body(&node.body)?;
        self.tuple(&[label, arity, body])
    }

    fn body(&mut self, body: &NodeBody) -> CodecResult<ObjectIdentifier> {
        let fields = match body {
            NodeBody::Jump { target, args } => vec![
                self.int(JUMP)?,
                self.string(target)?,
                self.ints(args.iter().map(|&a| i64::from(a)))?,
            ],
            NodeBody::Branch {
                condition,
                if_true,
                if_false,
            } => vec![
                self.int(BRANCH)?,
                self.int((*condition).into())?,
                self.string(if_true)?,
                self.string(if_false)?,
            ],
            NodeBody::Apply { callee, args, next } => vec![
                self.int(APPLY)?,
                self.primitive(callee)?,
                self.ints(args.iter().map(|&a| i64::from(a)))?,
                self.string(next)?,
            ],
            NodeBody::Finish { arg, is_exception } => vec![
                self.int(FINISH)?,
                self.int((*arg).into())?,
                self.primitive(&Primitive::Bool(*is_exception))?,
            ],
            NodeBody::Subgraphs { members, next } => {
                let wire = members
                    .iter()
                    .map(|id| id.to_wire())
                    .collect::<Result<Vec<_>, _>>()?;
                vec![self.int(SUBGRAPHS)?, self.ints(wire)?, self.string(next)?]
            }
        };
        self.tuple(&fields)
    }
}

struct GraphReader {
    values: HashMap<ObjectIdentifier, Value>,
}

impl GraphReader {
    /// Read every record up to the sentinel. The last record is the root.
    fn parse(bytes: &[u8]) -> StoreResult<(Self, ObjectIdentifier)> {
        let mut reader = RecordReader::new(bytes);
        let mut values = HashMap::new();
        let mut root = None;
        while let Some(record) = reader.next_record()? {
            if let Some(members) = record.value.as_tuple() {
                if let Some(missing) = members.iter().find(|m| !values.contains_key(*m)) {
                    return Err(malformed(format!(
                        "tuple {} references {missing} before its definition",
                        record.id
                    )));
                }
            }
            if values.insert(record.id, record.value).is_some() {
                return Err(malformed(format!("identifier {} defined twice", record.id)));
            }
            root = Some(record.id);
        }
        if !reader.is_exhausted() {
            return Err(malformed(format!(
                "{} trailing bytes after end of stream",
                reader.remaining()
            )));
        }
        let root = root.ok_or_else(|| malformed("empty graph stream"))?;
        Ok((Self { values }, root))
    }

    fn value(&self, id: ObjectIdentifier) -> StoreResult<&Value> {
        self.values
            .get(&id)
            .ok_or_else(|| malformed(format!("dangling member {id}")))
    }

    fn tuple(&self, id: ObjectIdentifier) -> StoreResult<&[ObjectIdentifier]> {
        self.value(id)?
            .as_tuple()
            .ok_or_else(|| malformed(format!("member {id} is not a tuple")))
    }

    fn primitive(&self, id: ObjectIdentifier) -> StoreResult<&Primitive> {
        self.value(id)?
            .as_primitive()
            .ok_or_else(|| malformed(format!("member {id} is not a primitive")))
    }

    fn string(&self, id: ObjectIdentifier) -> StoreResult<String> {
        let bytes = self
            .primitive(id)?
            .as_str_bytes()
            .ok_or_else(|| malformed(format!("member {id} is not a string")))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| malformed(format!("member {id} is not valid UTF-8")))
    }

    fn int(&self, id: ObjectIdentifier) -> StoreResult<i64> {
        self.primitive(id)?
            .as_int()
            .ok_or_else(|| malformed(format!("member {id} is not an integer")))
    }

    fn index(&self, id: ObjectIdentifier) -> StoreResult<u32> {
        narrow(self.int(id)?)
    }

    fn bool(&self, id: ObjectIdentifier) -> StoreResult<bool> {
        match self.primitive(id)? {
            Primitive::Bool(b) => Ok(*b),
            _ => Err(malformed(format!("member {id} is not a boolean"))),
        }
    }

    fn ints(&self, id: ObjectIdentifier) -> StoreResult<Vec<i64>> {
        let items = self
            .value(id)?
            .as_list()
            .ok_or_else(|| malformed(format!("member {id} is not a list")))?;
        items
            .iter()
            .map(|p| {
                p.as_int()
                    .ok_or_else(|| malformed(format!("list {id} holds a non-integer")))
            })
            .collect()
    }

    fn indices(&self, id: ObjectIdentifier) -> StoreResult<Vec<u32>> {
        self.ints(id)?.into_iter().map(narrow).collect()
    }

    fn node(&self, id: ObjectIdentifier) -> StoreResult<(String, ControlFlowNode)> {
        let &[label, arity, body] = self.tuple(id)? else {
            return Err(malformed(format!("block {id} must have three members")));
        };
        let node = ControlFlowNode::new(self.index(arity)?, self.body(body)?);
        Ok((self.string(label)?, node))
    }

    fn body(&self, id: ObjectIdentifier) -> StoreResult<NodeBody> {
        let (&kind, fields) = self
            .tuple(id)?
            .split_first()
            .ok_or_else(|| malformed(format!("node body {id} is empty")))?;
        let body = match (self.int(kind)?, fields) {
            (JUMP, &[target, args]) => NodeBody::Jump {
                target: self.string(target)?,
                args: self.indices(args)?,
            },
            (BRANCH, &[condition, if_true, if_false]) => NodeBody::Branch {
                condition: self.index(condition)?,
                if_true: self.string(if_true)?,
                if_false: self.string(if_false)?,
            },
            (APPLY, &[callee, args, next]) => NodeBody::Apply {
                callee: self.primitive(callee)?.clone(),
                args: self.indices(args)?,
                next: self.string(next)?,
            },
            (FINISH, &[arg, is_exception]) => NodeBody::Finish {
                arg: self.index(arg)?,
                is_exception: self.bool(is_exception)?,
            },
            (SUBGRAPHS, &[members, next]) => NodeBody::Subgraphs {
                members: self
                    .ints(members)?
                    .into_iter()
                    .map(ObjectIdentifier::from_wire)
                    .collect::<Result<_, _>>()?,
                next: self.string(next)?,
            },
            (kind, fields) => {
                return Err(malformed(format!(
                    "node body kind {kind} with {} fields",
                    fields.len()
                )))
            }
        };
        Ok(body)
    }
}

fn narrow(value: i64) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| malformed(format!("argument index {value} out of range")))
}

/// Anything the store can hold under an identifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MemoizableObject {
    Graph(ControlFlowGraph),
    Value(Value),
}

impl MemoizableObject {
    /// Short name of the object's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Graph(_) => ControlFlowGraph::KIND,
            Self::Value(v) => v.tag().name(),
        }
    }

    /// The codec value this object is written as.
    pub fn to_value(&self) -> StoreResult<Value> {
        match self {
            Self::Graph(graph) => Ok(Value::Packed {
                dtype: GRAPH_DTYPE.to_owned(),
                bytes: graph.encode()?,
            }),
            Self::Value(Value::Packed { dtype, .. }) if dtype == GRAPH_DTYPE => {
                Err(StoreError::ReservedDescriptor(dtype.clone()))
            }
            Self::Value(value) => Ok(value.clone()),
        }
    }

    /// Rebuild an object from a decoded record value.
    pub fn from_value(value: Value) -> StoreResult<Self> {
        match value {
            Value::Packed { dtype, bytes } if dtype == GRAPH_DTYPE => {
                Ok(Self::Graph(ControlFlowGraph::decode(&bytes)?))
            }
            value => Ok(Self::Value(value)),
        }
    }

    /// Tag and payload bytes, without an identifier prefix.
    ///
    /// Fails exactly when the object cannot be written to a store file.
    pub fn encode_payload(&self) -> StoreResult<Vec<u8>> {
        let value = self.to_value()?;
        let mut buf = Vec::new();
        writer::write_value(&mut buf, &value)?;
        Ok(buf)
    }

    /// BLAKE3 digest of the payload. Equal digests mean equal structure.
    pub fn fingerprint(&self) -> StoreResult<[u8; 32]> {
        Ok(fingerprint_payload(&self.encode_payload()?))
    }
}

pub(crate) fn fingerprint_payload(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}

impl From<ControlFlowGraph> for MemoizableObject {
    fn from(graph: ControlFlowGraph) -> Self {
        Self::Graph(graph)
    }
}

impl From<Value> for MemoizableObject {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Types that can be stored and looked up by identifier.
pub trait Memoizable: Sized {
    /// Name reported when a lookup finds another kind of object.
    const KIND: &'static str;

    fn into_object(self) -> MemoizableObject;

    /// `None` when `object` is not of this type.
    fn from_object(object: &MemoizableObject) -> Option<Self>;
}

impl Memoizable for ControlFlowGraph {
    const KIND: &'static str = "GRAPH";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Graph(self)
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        match object {
            MemoizableObject::Graph(g) => Some(g.clone()),
            MemoizableObject::Value(_) => None,
        }
    }
}

impl Memoizable for MemoizableObject {
    const KIND: &'static str = "OBJECT";

    fn into_object(self) -> MemoizableObject {
        self
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        Some(object.clone())
    }
}

impl Memoizable for Value {
    const KIND: &'static str = "VALUE";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Value(self)
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        match object {
            MemoizableObject::Value(v) => Some(v.clone()),
            MemoizableObject::Graph(_) => None,
        }
    }
}

fn primitive_of(object: &MemoizableObject) -> Option<&Primitive> {
    match object {
        MemoizableObject::Value(v) => v.as_primitive(),
        MemoizableObject::Graph(_) => None,
    }
}

impl Memoizable for i64 {
    const KIND: &'static str = "INT";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Value(Primitive::Int(self).into())
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        primitive_of(object)?.as_int()
    }
}

impl Memoizable for f64 {
    const KIND: &'static str = "FLOAT";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Value(Primitive::Float(self).into())
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        match primitive_of(object)? {
            Primitive::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl Memoizable for bool {
    const KIND: &'static str = "BOOL";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Value(Primitive::Bool(self).into())
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        match primitive_of(object)? {
            Primitive::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl Memoizable for String {
    const KIND: &'static str = "STR";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Value(Primitive::from(self).into())
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        let bytes = primitive_of(object)?.as_str_bytes()?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

/// A tuple of references to other stored objects.
impl Memoizable for Vec<ObjectIdentifier> {
    const KIND: &'static str = "TUPLE";

    fn into_object(self) -> MemoizableObject {
        MemoizableObject::Value(Value::Tuple(self))
    }

    fn from_object(object: &MemoizableObject) -> Option<Self> {
        match object {
            MemoizableObject::Value(v) => v.as_tuple().map(<[_]>::to_vec),
            MemoizableObject::Graph(_) => None,
        }
    }
}
