//! Decoding of encoded SEXPs into the node arena.

use super::{Entry, ListEncoding, Node, NodeData, NodeId, Rexp, SexpKind, NA_BYTE};
use crate::error::ProtocolError;
use crate::frame::{xt, ParamHeader, TYPE_MASK};
use bytes::Bytes;
use std::ops::Range;

/// Deepest nesting accepted before a tree is rejected.
pub const MAX_DEPTH: usize = 1024;

fn malformed(offset: usize, reason: &'static str) -> ProtocolError {
    ProtocolError::MalformedSexp { offset, reason }
}

pub(super) fn parse(buf: Bytes, range: Range<usize>) -> Result<Rexp, ProtocolError> {
    if range.start > range.end || range.end > buf.len() {
        return Err(malformed(range.start, "range outside buffer"));
    }
    let mut decoder = Decoder {
        buf: &buf,
        nodes: Vec::new(),
    };
    let root = decoder.run(range.start, range.end)?;
    let nodes = decoder.nodes;
    tracing::trace!("decoded SEXP: {} nodes", nodes.len());
    Ok(Rexp { buf, nodes, root })
}

struct Decoder<'b> {
    buf: &'b [u8],
    nodes: Vec<Node>,
}

/// Result of reading one node header.
enum Step {
    Node(NodeId),
    Open(Open),
}

/// A node whose attribute or parts are still being decoded.
struct Open {
    type_code: u8,
    start: usize,
    /// Attribute plus content.
    body: Range<usize>,
    attr: Option<NodeId>,
    /// `None` until the attribute, if any, has been decoded.
    content_start: Option<usize>,
    /// Offset of the next part.
    pos: usize,
    layout: Layout,
}

enum Layout {
    Leaf,
    Vector(Vec<NodeId>),
    Untagged(Vec<Entry>),
    Tagged {
        entries: Vec<Entry>,
        value: Option<NodeId>,
    },
    Legacy(Cells),
}

/// Flattening state for `XT_LIST` head, tail and tag cells. Tail cells are
/// entered in place, so a long pairlist costs no nesting depth.
struct Cells {
    entries: Vec<Entry>,
    part: CellPart,
    /// Entry holding the current cell's head.
    current: usize,
    /// End of the current cell's content.
    cell_end: usize,
    /// Cells whose tag follows a tail that is being flattened.
    outer: Vec<PendingTag>,
}

#[derive(Clone, Copy)]
enum CellPart {
    Head,
    Tail,
    Tag,
    Done,
}

struct PendingTag {
    entry: usize,
    at: usize,
    cell_end: usize,
}

impl Decoder<'_> {
    /// Decodes the tree rooted at `pos` with an explicit work stack. Each
    /// open composite sits on the stack while its parts are decoded; its
    /// depth is its stack position.
    fn run(&mut self, pos: usize, end: usize) -> Result<NodeId, ProtocolError> {
        let mut stack: Vec<Open> = Vec::new();
        let mut step = self.begin(pos, end, 0)?;
        loop {
            let mut finished = match step {
                Step::Node(id) => Some(id),
                Step::Open(open) => {
                    stack.push(open);
                    None
                }
            };
            step = loop {
                let Some(top) = stack.last_mut() else {
                    return finished.ok_or_else(|| malformed(pos, "empty SEXP"));
                };
                if let Some(id) = finished.take() {
                    self.accept(top, id);
                }
                if let Some((at, bound)) = self.next_part(top)? {
                    break self.begin(at, bound, stack.len())?;
                }
                if let Some(open) = stack.pop() {
                    finished = Some(self.finish(open));
                }
            };
        }
    }

    /// Reads the header at `pos`. The node, including any attribute, must
    /// end at or before `end`.
    fn begin(&mut self, pos: usize, end: usize, depth: usize) -> Result<Step, ProtocolError> {
        if depth > MAX_DEPTH {
            return Err(malformed(pos, "nesting too deep"));
        }
        let header = ParamHeader::read(self.buf, pos, end)
            .map_err(|_| malformed(pos, "header overruns container"))?;
        let body_start = pos + header.encoded_len();
        let body_end = usize::try_from(header.length)
            .ok()
            .and_then(|len| body_start.checked_add(len))
            .filter(|&e| e <= end)
            .ok_or_else(|| malformed(pos, "length overruns container"))?;

        let layout = match SexpKind::from_type(header.type_code) {
            SexpKind::Vector => Layout::Vector(Vec::new()),
            SexpKind::List(ListEncoding::Untagged) => Layout::Untagged(Vec::new()),
            SexpKind::List(ListEncoding::Tagged) => Layout::Tagged {
                entries: Vec::new(),
                value: None,
            },
            SexpKind::List(ListEncoding::Legacy) => Layout::Legacy(Cells {
                entries: Vec::new(),
                part: CellPart::Head,
                current: 0,
                cell_end: body_end,
                outer: Vec::new(),
            }),
            _ => Layout::Leaf,
        };
        let open = Open {
            type_code: header.type_code,
            start: pos,
            body: body_start..body_end,
            attr: None,
            content_start: (!header.has_attr).then_some(body_start),
            pos: body_start,
            layout,
        };
        if open.content_start.is_some() && matches!(open.layout, Layout::Leaf) {
            return Ok(Step::Node(self.finish(open)));
        }
        Ok(Step::Open(open))
    }

    /// Position and bound of the next part of `open`, or `None` when it is
    /// complete.
    fn next_part(&self, open: &mut Open) -> Result<Option<(usize, usize)>, ProtocolError> {
        if open.content_start.is_none() {
            return Ok(Some((open.body.start, open.body.end)));
        }
        let end = open.body.end;
        match &mut open.layout {
            Layout::Leaf => Ok(None),
            Layout::Vector(_) | Layout::Untagged(_) | Layout::Tagged { .. } => {
                Ok((open.pos < end).then_some((open.pos, end)))
            }
            Layout::Legacy(cells) => self.next_cell_part(cells, &mut open.pos),
        }
    }

    fn next_cell_part(
        &self,
        cells: &mut Cells,
        pos: &mut usize,
    ) -> Result<Option<(usize, usize)>, ProtocolError> {
        loop {
            match cells.part {
                CellPart::Head | CellPart::Tag => {
                    if *pos < cells.cell_end {
                        return Ok(Some((*pos, cells.cell_end)));
                    }
                    cells.part = CellPart::Done;
                }
                CellPart::Tail => {
                    if *pos >= cells.cell_end {
                        cells.part = CellPart::Done;
                        continue;
                    }
                    match ParamHeader::read(self.buf, *pos, cells.cell_end) {
                        Ok(header) if header.type_code == xt::LIST && !header.has_attr => {
                            let tail_start = *pos + header.encoded_len();
                            let tail_end = usize::try_from(header.length)
                                .ok()
                                .and_then(|len| tail_start.checked_add(len))
                                .filter(|&e| e <= cells.cell_end)
                                .ok_or_else(|| malformed(*pos, "length overruns container"))?;
                            cells.outer.push(PendingTag {
                                entry: cells.current,
                                at: tail_end,
                                cell_end: cells.cell_end,
                            });
                            cells.cell_end = tail_end;
                            *pos = tail_start;
                            cells.part = CellPart::Head;
                        }
                        // Anything else is decoded as an ordinary part
                        _ => return Ok(Some((*pos, cells.cell_end))),
                    }
                }
                CellPart::Done => match cells.outer.pop() {
                    Some(pending) => {
                        cells.current = pending.entry;
                        cells.cell_end = pending.cell_end;
                        *pos = pending.at;
                        cells.part = CellPart::Tag;
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    /// Records the finished part `id` in `open`.
    fn accept(&self, open: &mut Open, id: NodeId) {
        let next = self.nodes[id].body.end;
        open.pos = next;
        if open.content_start.is_none() {
            open.attr = Some(id);
            open.content_start = Some(next);
            return;
        }
        match &mut open.layout {
            Layout::Leaf => {}
            Layout::Vector(ids) => ids.push(id),
            Layout::Untagged(entries) => entries.push(Entry {
                value: id,
                tag: None,
            }),
            Layout::Tagged { entries, value } => match value.take() {
                Some(value) => entries.push(Entry {
                    value,
                    tag: Some(id),
                }),
                None => *value = Some(id),
            },
            Layout::Legacy(cells) => match cells.part {
                CellPart::Head => {
                    cells.current = cells.entries.len();
                    cells.entries.push(Entry {
                        value: id,
                        tag: None,
                    });
                    cells.part = CellPart::Tail;
                }
                CellPart::Tail => {
                    // An attributed XT_LIST tail still contributes its entries
                    if let NodeData::Entries(rest) = &self.nodes[id].data {
                        if self.nodes[id].type_code == xt::LIST {
                            cells.entries.extend_from_slice(rest);
                        }
                    }
                    cells.part = CellPart::Tag;
                }
                CellPart::Tag | CellPart::Done => {
                    if let Some(entry) = cells.entries.get_mut(cells.current) {
                        entry.tag = Some(id);
                    }
                    cells.part = CellPart::Done;
                }
            },
        }
    }

    fn finish(&mut self, open: Open) -> NodeId {
        let content = open.content_start.unwrap_or(open.body.start)..open.body.end;
        let data = match open.layout {
            Layout::Leaf => leaf_data(self.buf, open.type_code, content.clone()),
            Layout::Vector(ids) => NodeData::Children(ids),
            Layout::Untagged(entries) => NodeData::Entries(entries),
            Layout::Tagged { mut entries, value } => {
                // A trailing value without a tag is kept untagged
                if let Some(value) = value {
                    entries.push(Entry { value, tag: None });
                }
                NodeData::Entries(entries)
            }
            Layout::Legacy(cells) => NodeData::Entries(cells.entries),
        };
        self.nodes.push(Node {
            type_code: open.type_code,
            start: open.start,
            body: open.body,
            content,
            attr: open.attr,
            data,
        });
        self.nodes.len() - 1
    }
}

/// Content interpretation for nodes without children.
pub(super) fn leaf_data(buf: &[u8], type_code: u8, content: Range<usize>) -> NodeData {
    match SexpKind::from_type(type_code) {
        SexpKind::String => NodeData::Text(until_nul(buf, content)),
        SexpKind::Symbol => NodeData::Text(symbol_name(buf, type_code, content)),
        SexpKind::StringArray => NodeData::Strings(split_strings(buf, content)),
        _ => NodeData::Opaque,
    }
}

fn until_nul(buf: &[u8], range: Range<usize>) -> Range<usize> {
    match buf[range.clone()].iter().position(|&b| b == 0) {
        Some(n) => range.start..range.start + n,
        None => range,
    }
}

/// `XT_SYMNAME` holds the name itself; `XT_SYM` wraps it in an `XT_STR`.
fn symbol_name(buf: &[u8], type_code: u8, content: Range<usize>) -> Range<usize> {
    if type_code == xt::SYMNAME {
        return until_nul(buf, content);
    }
    match ParamHeader::read(buf, content.start, content.end) {
        Ok(inner) if inner.type_code & TYPE_MASK == xt::STR => {
            let start = content.start + inner.encoded_len();
            let end = usize::try_from(inner.length)
                .ok()
                .and_then(|len| start.checked_add(len))
                .map_or(content.end, |e| e.min(content.end));
            until_nul(buf, start..end)
        }
        _ => content.start..content.start,
    }
}

/// Splits on NUL terminators. An unterminated trailing run is padding.
fn split_strings(buf: &[u8], content: Range<usize>) -> Vec<Option<Range<usize>>> {
    let mut items = Vec::new();
    let mut start = content.start;
    for i in content {
        if buf[i] != 0 {
            continue;
        }
        items.push(match &buf[start..i] {
            [NA_BYTE] => None,
            [NA_BYTE, ..] => Some(start + 1..i),
            _ => Some(start..i),
        });
        start = i + 1;
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_strings() {
        let buf = b"ab\0\0\xff\0\xff\xffc\0\x01\x01";
        let items = split_strings(buf, 0..buf.len());
        assert_eq!(
            items,
            vec![Some(0..2), Some(3..3), None, Some(7..9)]
        );
    }

    #[test]
    fn test_until_nul() {
        let buf = b"abc\0\0\0";
        assert_eq!(until_nul(buf, 0..6), 0..3);
        assert_eq!(until_nul(buf, 0..2), 0..2);
    }

    #[test]
    fn test_symbol_with_bad_inner_type() {
        // XT_SYM whose content is not an XT_STR has an empty name
        let buf = [xt::ARRAY_INT, 0, 0, 0];
        assert_eq!(symbol_name(&buf, xt::SYM, 0..4), 0..0);
    }

    #[test]
    fn test_attribute_span_subtracted() {
        let mut buf = Vec::new();
        // NULL attribute (4 bytes) followed by one integer
        ParamHeader::new(xt::ARRAY_INT, 8).with_attr().put(&mut buf);
        ParamHeader::new(xt::NULL, 0).put(&mut buf);
        buf.extend_from_slice(&3i32.to_le_bytes());
        let len = buf.len();

        let rexp = parse(Bytes::from(buf), 0..len).unwrap();
        let root = rexp.root();
        assert!(root.has_attributes());
        assert_eq!(root.byte_len(), 4);
        assert_eq!(root.integers(), Some(vec![3]));
        assert_eq!(rexp.node_count(), 2);
    }

    #[test]
    fn test_attribute_overrunning_parent() {
        let mut buf = Vec::new();
        ParamHeader::new(xt::ARRAY_INT, 4).with_attr().put(&mut buf);
        ParamHeader::new(xt::ARRAY_INT, 8).put(&mut buf);
        buf.extend_from_slice(&[0; 8]);
        let len = buf.len();
        assert!(matches!(
            parse(Bytes::from(buf), 0..len),
            Err(ProtocolError::MalformedSexp { .. })
        ));
    }

    #[test]
    fn test_long_legacy_list() {
        // Cell i: header, integer head i, cell i + 1 (NULL after the last),
        // symbol tag. Every cell adds 24 bytes to its tail.
        let cells = 10_000;
        let mut buf = Vec::new();
        for i in 0..cells {
            ParamHeader::new(xt::LIST, 24 * (cells - i)).put(&mut buf);
            ParamHeader::new(xt::ARRAY_INT, 4).put(&mut buf);
            buf.extend_from_slice(&(i as i32).to_le_bytes());
        }
        ParamHeader::new(xt::NULL, 0).put(&mut buf);
        for i in (0..cells).rev() {
            buf.extend_from_slice(&Rexp::symbol(&format!("{:06}", i)).to_bytes());
        }
        let len = buf.len();
        assert_eq!(len, 24 * cells + 4);

        let rexp = std::thread::spawn(move || parse(Bytes::from(buf), 0..len).unwrap())
            .join()
            .unwrap();
        let root = rexp.root();
        assert_eq!(root.kind(), SexpKind::List(ListEncoding::Legacy));
        assert_eq!(root.len(), cells);
        // heads, tags, the closing NULL and the root
        assert_eq!(rexp.node_count(), 2 * cells + 2);
        for (i, (value, tag)) in root.entries().enumerate() {
            assert_eq!(value.int_at(0), i as i32);
            assert_eq!(tag.unwrap().symbol_name(), Some(format!("{:06}", i).as_str()));
        }
    }

    #[test]
    fn test_legacy_tail_with_attribute() {
        // The tail carries an attribute, so it is decoded as a node and its
        // entries appended
        let mut tail = Vec::new();
        ParamHeader::new(xt::LIST, 12).with_attr().put(&mut tail);
        ParamHeader::new(xt::NULL, 0).put(&mut tail);
        ParamHeader::new(xt::ARRAY_INT, 4).put(&mut tail);
        tail.extend_from_slice(&2i32.to_le_bytes());

        let mut buf = Vec::new();
        ParamHeader::new(xt::LIST, 8 + tail.len()).put(&mut buf);
        ParamHeader::new(xt::ARRAY_INT, 4).put(&mut buf);
        buf.extend_from_slice(&1i32.to_le_bytes());
        buf.extend_from_slice(&tail);
        let len = buf.len();

        let rexp = parse(Bytes::from(buf), 0..len).unwrap();
        let values: Vec<i32> = rexp.root().entries().map(|(v, _)| v.int_at(0)).collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn test_tagged_list_trailing_value() {
        let mut buf = Vec::new();
        ParamHeader::new(xt::LIST_TAG, 8).put(&mut buf);
        ParamHeader::new(xt::ARRAY_INT, 4).put(&mut buf);
        buf.extend_from_slice(&1i32.to_le_bytes());
        let len = buf.len();

        let rexp = parse(Bytes::from(buf), 0..len).unwrap();
        assert_eq!(rexp.root().len(), 1);
        assert!(rexp.root().tag().is_none());
    }
}
