//! Construction of SEXPs for sending, and their wire encoding.
//!
//! Constructed values are encoded once into their own buffer and indexed in
//! the same node arena used for decoded values. Composite values copy their
//! parts' bytes and re-base the parts' nodes into the new buffer.

use super::decode::{self, leaf_data};
use super::{Entry, Node, NodeData, NodeId, Rexp, NA_BYTE, STRING_PAD};
use crate::error::ProtocolError;
use crate::frame::{align4, xt, ParamHeader};
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Range;

impl Rexp {
    /// `NULL`.
    pub fn null() -> Self {
        Self::leaf(xt::NULL, &[])
    }

    /// Integer array (`XT_ARRAY_INT`).
    pub fn integers(values: &[i32]) -> Self {
        let mut content = Vec::with_capacity(values.len() * 4);
        for &v in values {
            content.put_i32_le(v);
        }
        Self::leaf(xt::ARRAY_INT, &content)
    }

    /// Double array (`XT_ARRAY_DOUBLE`).
    pub fn doubles(values: &[f64]) -> Self {
        let mut content = Vec::with_capacity(values.len() * 8);
        for &v in values {
            content.put_f64_le(v);
        }
        Self::leaf(xt::ARRAY_DOUBLE, &content)
    }

    /// String array (`XT_ARRAY_STR`).
    pub fn strings<S: AsRef<str>>(values: &[S]) -> Self {
        Self::string_array(values.iter().map(|s| Some(s.as_ref().as_bytes())))
    }

    /// String array where `None` elements are NA.
    pub fn strings_with_na(values: &[Option<&str>]) -> Self {
        Self::string_array(values.iter().map(|s| s.map(str::as_bytes)))
    }

    fn string_array<'s>(values: impl Iterator<Item = Option<&'s [u8]>>) -> Self {
        let mut content = Vec::new();
        for value in values {
            match value {
                None => content.push(NA_BYTE),
                Some(bytes) => {
                    if bytes.first() == Some(&NA_BYTE) {
                        content.push(NA_BYTE);
                    }
                    content.extend_from_slice(bytes);
                }
            }
            content.push(0);
        }
        content.resize(align4(content.len()), STRING_PAD);
        Self::leaf(xt::ARRAY_STR, &content)
    }

    /// Single string (`XT_STR`). Deprecated on the wire in favour of
    /// [`Rexp::strings`], but still understood by every server.
    pub fn string(value: &str) -> Self {
        Self::leaf(xt::STR, &nul_terminated(value))
    }

    /// Symbol (`XT_SYMNAME`).
    pub fn symbol(name: &str) -> Self {
        Self::leaf(xt::SYMNAME, &nul_terminated(name))
    }

    /// Generic vector (`XT_VECTOR`).
    pub fn vector(children: &[Rexp]) -> Self {
        let body_len = children.iter().map(Rexp::storage_size).sum();
        let mut asm = Assembler::new(xt::VECTOR, body_len, false);
        let ids = children.iter().map(|child| asm.append(child)).collect();
        asm.finish(None, NodeData::Children(ids))
    }

    /// List without tags (`XT_LIST_NOTAG`).
    pub fn list(values: &[Rexp]) -> Self {
        let body_len = values.iter().map(Rexp::storage_size).sum();
        let mut asm = Assembler::new(xt::LIST_NOTAG, body_len, false);
        let entries = values
            .iter()
            .map(|value| Entry {
                value: asm.append(value),
                tag: None,
            })
            .collect();
        asm.finish(None, NodeData::Entries(entries))
    }

    /// List of symbol-tagged values (`XT_LIST_TAG`).
    pub fn tagged_list(entries: &[(&str, Rexp)]) -> Self {
        let tags: Vec<Rexp> = entries.iter().map(|(tag, _)| Rexp::symbol(tag)).collect();
        let body_len = entries
            .iter()
            .zip(&tags)
            .map(|((_, value), tag)| value.storage_size() + tag.storage_size())
            .sum();
        let mut asm = Assembler::new(xt::LIST_TAG, body_len, false);
        let entries = entries
            .iter()
            .zip(&tags)
            .map(|((_, value), tag)| Entry {
                value: asm.append(value),
                tag: Some(asm.append(tag)),
            })
            .collect();
        asm.finish(None, NodeData::Entries(entries))
    }

    /// Vector with a `names` attribute.
    pub fn named_vector(names: &[&str], values: &[Rexp]) -> Self {
        let attrs = Rexp::tagged_list(&[("names", Rexp::strings(names))]);
        Rexp::vector(values).with_attributes(&attrs)
    }

    /// Copy of this value carrying `attrs` as its attribute, replacing any
    /// existing one.
    pub fn with_attributes(&self, attrs: &Rexp) -> Self {
        let node = &self.nodes[self.root];
        let content = &self.buf[node.content.clone()];
        let body_len = attrs.storage_size() + content.len();

        let mut asm = Assembler::new(node.type_code, body_len, true);
        let attr = asm.append(attrs);
        let content_start = asm.buf.len();
        asm.buf.put_slice(content);
        let delta = offset_delta(content_start, node.content.start);
        let remap = asm.copy_nodes(self, &node.parts(), delta);
        let data = relocate(&node.data, delta, &remap);
        asm.finish(Some(attr), data)
    }

    /// Builds a value from a type tag and raw content, padded to 4 bytes.
    /// The content is decoded, so composite types are validated.
    pub fn from_parts(type_code: u8, content: &[u8]) -> Result<Self, ProtocolError> {
        let pad = if type_code == xt::ARRAY_STR { STRING_PAD } else { 0 };
        let padded = align4(content.len());
        let mut buf = BytesMut::with_capacity(ParamHeader::size_for(padded) + padded);
        ParamHeader::new(type_code, padded).put(&mut buf);
        buf.put_slice(content);
        buf.put_bytes(pad, padded - content.len());
        let len = buf.len();
        decode::parse(buf.freeze(), 0..len)
    }

    fn leaf(type_code: u8, content: &[u8]) -> Self {
        let mut asm = Assembler::new(type_code, content.len(), false);
        asm.buf.put_slice(content);
        let data = leaf_data(&asm.buf, type_code, asm.body_start..asm.buf.len());
        asm.finish(None, data)
    }

    /// Bytes this value occupies once encoded, header included. The header
    /// grows to 8 bytes when the body exceeds the 24-bit length field.
    pub fn storage_size(&self) -> usize {
        let body = self.nodes[self.root].body.len();
        ParamHeader::size_for(body) + body
    }

    /// Writes the header (with large and attribute flags as needed) and the
    /// body into `dst`.
    pub fn store<B: BufMut>(&self, dst: &mut B) {
        let node = &self.nodes[self.root];
        let mut header = ParamHeader::new(node.type_code, node.body.len());
        if node.attr.is_some() {
            header = header.with_attr();
        }
        header.put(dst);
        dst.put_slice(&self.buf[node.body.clone()]);
    }

    /// The encoded value in a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.storage_size());
        self.store(&mut buf);
        buf.freeze()
    }
}

/// Builds one encoded value and its nodes.
struct Assembler {
    type_code: u8,
    start: usize,
    body_start: usize,
    buf: BytesMut,
    nodes: Vec<Node>,
}

impl Assembler {
    /// Writes the header for a body of `body_len` bytes into a buffer sized
    /// for the whole value.
    fn new(type_code: u8, body_len: usize, has_attr: bool) -> Self {
        let mut buf = BytesMut::with_capacity(ParamHeader::size_for(body_len) + body_len);
        let mut header = ParamHeader::new(type_code, body_len);
        if has_attr {
            header = header.with_attr();
        }
        header.put(&mut buf);
        Self {
            type_code,
            start: 0,
            body_start: buf.len(),
            buf,
            nodes: Vec::new(),
        }
    }

    /// Appends `value`'s encoding and copies its nodes; returns the id of
    /// its root in this arena.
    fn append(&mut self, value: &Rexp) -> NodeId {
        let start = self.buf.len();
        value.store(&mut self.buf);
        let body_start = start + ParamHeader::size_for(value.nodes[value.root].body.len());
        let delta = offset_delta(body_start, value.nodes[value.root].body.start);
        let remap = self.copy_nodes(value, &[value.root], delta);
        let id = remap[value.root];
        self.nodes[id].start = start;
        id
    }

    /// Copies the subtrees under `roots` from `src`, shifting byte ranges by
    /// `delta`. Returns the new id of every copied node, indexed by its id
    /// in `src`.
    fn copy_nodes(&mut self, src: &Rexp, roots: &[NodeId], delta: isize) -> Vec<NodeId> {
        let mut remap = vec![0; src.nodes.len()];
        let mut order = Vec::new();
        let mut pending = roots.to_vec();
        while let Some(id) = pending.pop() {
            remap[id] = self.nodes.len() + order.len();
            order.push(id);
            pending.extend(src.nodes[id].parts());
        }
        for id in order {
            let node = &src.nodes[id];
            self.nodes.push(Node {
                type_code: node.type_code,
                start: node.start.wrapping_add_signed(delta),
                body: shift(&node.body, delta),
                content: shift(&node.content, delta),
                attr: node.attr.map(|a| remap[a]),
                data: relocate(&node.data, delta, &remap),
            });
        }
        remap
    }

    fn finish(mut self, attr: Option<NodeId>, data: NodeData) -> Rexp {
        let end = self.buf.len();
        let content_start = attr.map_or(self.body_start, |id| self.nodes[id].body.end);
        self.nodes.push(Node {
            type_code: self.type_code,
            start: self.start,
            body: self.body_start..end,
            content: content_start..end,
            attr,
            data,
        });
        Rexp {
            buf: self.buf.freeze(),
            root: self.nodes.len() - 1,
            nodes: self.nodes,
        }
    }
}

fn nul_terminated(text: &str) -> Vec<u8> {
    let mut content = Vec::with_capacity(align4(text.len() + 1));
    content.extend_from_slice(text.as_bytes());
    content.resize(align4(text.len() + 1), 0);
    content
}

/// `data` with byte ranges shifted by `delta` and node ids mapped through
/// `remap`.
fn relocate(data: &NodeData, delta: isize, remap: &[NodeId]) -> NodeData {
    match data {
        NodeData::Opaque => NodeData::Opaque,
        NodeData::Text(range) => NodeData::Text(shift(range, delta)),
        NodeData::Strings(items) => NodeData::Strings(
            items
                .iter()
                .map(|item| item.as_ref().map(|r| shift(r, delta)))
                .collect(),
        ),
        NodeData::Children(ids) => NodeData::Children(ids.iter().map(|&id| remap[id]).collect()),
        NodeData::Entries(entries) => NodeData::Entries(
            entries
                .iter()
                .map(|e| Entry {
                    value: remap[e.value],
                    tag: e.tag.map(|t| remap[t]),
                })
                .collect(),
        ),
    }
}

fn offset_delta(to: usize, from: usize) -> isize {
    to as isize - from as isize
}

fn shift(range: &Range<usize>, delta: isize) -> Range<usize> {
    range.start.wrapping_add_signed(delta)..range.end.wrapping_add_signed(delta)
}
