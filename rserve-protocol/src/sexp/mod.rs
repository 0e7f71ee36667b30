//! R expressions (SEXPs) as carried in `DT_SEXP` parameters.
//!
//! A decoded tree is an [`Rexp`]: one shared byte buffer plus a flat arena of
//! nodes that refer into it by byte range. Received values share the payload
//! buffer of the message they came from; constructed values own a freshly
//! encoded buffer. Both are inspected through the borrowed [`Sexp`] view.
//!
//! Lists are flattened at decode time into an ordered run of
//! `(value, optional tag)` entries whatever their wire encoding, so
//! [`Sexp::head`], [`Sexp::tag`] and [`Sexp::tail`] are views over that run
//! rather than separately allocated cells.

mod decode;
mod encode;

pub use decode::MAX_DEPTH;

use crate::error::ProtocolError;
use crate::frame::xt;
use bytes::{Buf, Bytes};
use std::fmt;
use std::ops::Range;

/// Marks an NA element in a string array; also escapes a leading 0xFF byte.
const NA_BYTE: u8 = 0xff;

/// Filler used to pad string arrays, so padding never reads as an element.
const STRING_PAD: u8 = 0x01;

type NodeId = usize;

/// One element of a flattened list.
#[derive(Debug, Clone, Copy)]
struct Entry {
    value: NodeId,
    tag: Option<NodeId>,
}

#[derive(Debug, Clone)]
enum NodeData {
    /// Content is read directly (numbers, NULL, unknown types).
    Opaque,
    /// Single string or symbol name, without terminator.
    Text(Range<usize>),
    /// String array elements; `None` is NA.
    Strings(Vec<Option<Range<usize>>>),
    Children(Vec<NodeId>),
    Entries(Vec<Entry>),
}

#[derive(Debug, Clone)]
struct Node {
    type_code: u8,
    /// Offset of the node's header.
    start: usize,
    /// Attribute plus content; `body.end` is the offset of the next sibling.
    body: Range<usize>,
    /// Content after the attribute.
    content: Range<usize>,
    attr: Option<NodeId>,
    data: NodeData,
}

impl Node {
    /// Ids of the attribute and of every child, list value and tag.
    fn parts(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.attr.into_iter().collect();
        match &self.data {
            NodeData::Children(children) => ids.extend_from_slice(children),
            NodeData::Entries(entries) => {
                for entry in entries {
                    ids.push(entry.value);
                    ids.extend(entry.tag);
                }
            }
            _ => {}
        }
        ids
    }
}

/// Wire layouts of list-typed SEXPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEncoding {
    /// `XT_LIST`: nested head, tail, tag cells.
    Legacy,
    /// `XT_LIST_NOTAG` / `XT_LANG_NOTAG`: flat run of values.
    Untagged,
    /// `XT_LIST_TAG` / `XT_LANG_TAG`: alternating value and tag.
    Tagged,
}

/// The closed set of SEXP variants understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SexpKind {
    Null,
    Integer,
    Double,
    Symbol,
    StringArray,
    /// Deprecated single string (`XT_STR`).
    String,
    Vector,
    List(ListEncoding),
    /// Any other type tag; kept opaque so callers can skip it.
    Unknown(u8),
}

impl SexpKind {
    /// Maps a type tag (without flags) to its variant.
    pub fn from_type(type_code: u8) -> Self {
        match type_code {
            xt::NULL => SexpKind::Null,
            xt::INT | xt::ARRAY_INT => SexpKind::Integer,
            xt::DOUBLE | xt::ARRAY_DOUBLE => SexpKind::Double,
            xt::SYM | xt::SYMNAME => SexpKind::Symbol,
            xt::ARRAY_STR => SexpKind::StringArray,
            xt::STR => SexpKind::String,
            xt::VECTOR | xt::VECTOR_EXP | xt::VECTOR_STR => SexpKind::Vector,
            xt::LIST => SexpKind::List(ListEncoding::Legacy),
            xt::LIST_NOTAG | xt::LANG_NOTAG => SexpKind::List(ListEncoding::Untagged),
            xt::LIST_TAG | xt::LANG_TAG => SexpKind::List(ListEncoding::Tagged),
            other => SexpKind::Unknown(other),
        }
    }
}

/// A decoded or constructed SEXP tree.
#[derive(Clone)]
pub struct Rexp {
    buf: Bytes,
    nodes: Vec<Node>,
    root: NodeId,
}

impl Rexp {
    /// Decodes the SEXP starting at `range.start`, never reading past
    /// `range.end`. The tree keeps a handle to `buf`.
    pub fn parse(buf: Bytes, range: Range<usize>) -> Result<Self, ProtocolError> {
        decode::parse(buf, range)
    }

    /// The top-level node.
    pub fn root(&self) -> Sexp<'_> {
        Sexp::new(self, self.root)
    }

    /// Number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl fmt::Display for Rexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root(), f)
    }
}

impl fmt::Debug for Rexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rexp")
            .field("root", &format_args!("{}", self.root()))
            .field("nodes", &self.nodes.len())
            .finish()
    }
}

impl PartialEq for Rexp {
    fn eq(&self, other: &Self) -> bool {
        self.root() == other.root()
    }
}

/// Borrowed view of one node. For lists the view starts at an entry
/// position, which is how [`Sexp::tail`] is expressed.
#[derive(Clone, Copy)]
pub struct Sexp<'a> {
    rexp: &'a Rexp,
    id: NodeId,
    cursor: usize,
}

impl<'a> Sexp<'a> {
    fn new(rexp: &'a Rexp, id: NodeId) -> Self {
        Self {
            rexp,
            id,
            cursor: 0,
        }
    }

    fn node(&self) -> &'a Node {
        &self.rexp.nodes[self.id]
    }

    fn view(&self, id: NodeId) -> Sexp<'a> {
        Sexp::new(self.rexp, id)
    }

    fn slice(&self, range: &Range<usize>) -> &'a [u8] {
        &self.rexp.buf[range.clone()]
    }

    fn entry_slice(&self) -> &'a [Entry] {
        match &self.node().data {
            NodeData::Entries(entries) => entries.get(self.cursor..).unwrap_or(&[]),
            _ => &[],
        }
    }

    fn child_ids(&self) -> &'a [NodeId] {
        match &self.node().data {
            NodeData::Children(ids) => ids,
            _ => &[],
        }
    }

    /// Type tag without flags.
    pub fn type_code(&self) -> u8 {
        self.node().type_code
    }

    pub fn kind(&self) -> SexpKind {
        SexpKind::from_type(self.node().type_code)
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind(), SexpKind::List(_))
    }

    /// Content bytes, excluding header and attribute.
    pub fn content(&self) -> &'a [u8] {
        self.slice(&self.node().content)
    }

    /// Content length in bytes, excluding header and attribute.
    pub fn byte_len(&self) -> usize {
        self.node().content.len()
    }

    /// Offset of this node's header in the backing buffer.
    pub fn offset(&self) -> usize {
        self.node().start
    }

    /// Offset just past this node (header, attribute and content).
    pub fn next_offset(&self) -> usize {
        self.node().body.end
    }

    /// Number of elements: array items, children, remaining list entries,
    /// 1 for strings and symbols, content bytes for unknown types.
    pub fn len(&self) -> usize {
        match self.kind() {
            SexpKind::Null => 0,
            SexpKind::Integer => self.byte_len() / 4,
            SexpKind::Double => self.byte_len() / 8,
            SexpKind::Symbol | SexpKind::String => 1,
            SexpKind::StringArray => match &self.node().data {
                NodeData::Strings(items) => items.len(),
                _ => 0,
            },
            SexpKind::Vector => self.child_ids().len(),
            SexpKind::List(_) => self.entry_slice().len(),
            SexpKind::Unknown(_) => self.byte_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Attributes

    pub fn has_attributes(&self) -> bool {
        self.node().attr.is_some()
    }

    /// The attribute SEXP, usually a tagged list.
    pub fn attributes(&self) -> Option<Sexp<'a>> {
        self.node().attr.map(|id| self.view(id))
    }

    /// Value of the attribute tagged `name`.
    pub fn attribute(&self, name: &str) -> Option<Sexp<'a>> {
        let attrs = self.attributes()?;
        if !attrs.is_list() {
            return None;
        }
        attrs.entry_by_tag_name(name)
    }

    /// Symbol-tagged attribute names in order.
    pub fn attribute_names(&self) -> Vec<&'a str> {
        match self.attributes() {
            Some(attrs) if attrs.is_list() => attrs
                .entries()
                .filter_map(|(_, tag)| tag.and_then(|t| t.symbol_name()))
                .collect(),
            _ => Vec::new(),
        }
    }

    // Numbers

    /// Integer at `index`, or 0 when out of range or not an integer array.
    pub fn int_at(&self, index: usize) -> i32 {
        if self.kind() != SexpKind::Integer {
            return 0;
        }
        match self.content().chunks_exact(4).nth(index) {
            Some(mut raw) => raw.get_i32_le(),
            None => 0,
        }
    }

    pub fn integers(&self) -> Option<Vec<i32>> {
        if self.kind() != SexpKind::Integer {
            return None;
        }
        Some(
            self.content()
                .chunks_exact(4)
                .map(|mut raw| raw.get_i32_le())
                .collect(),
        )
    }

    /// Double at `index`, or 0.0 when out of range or not a double array.
    pub fn double_at(&self, index: usize) -> f64 {
        if self.kind() != SexpKind::Double {
            return 0.0;
        }
        match self.content().chunks_exact(8).nth(index) {
            Some(mut raw) => raw.get_f64_le(),
            None => 0.0,
        }
    }

    pub fn doubles(&self) -> Option<Vec<f64>> {
        if self.kind() != SexpKind::Double {
            return None;
        }
        Some(
            self.content()
                .chunks_exact(8)
                .map(|mut raw| raw.get_f64_le())
                .collect(),
        )
    }

    // Strings and symbols

    fn text(&self) -> Option<&'a str> {
        match &self.node().data {
            NodeData::Text(range) => std::str::from_utf8(self.slice(range)).ok(),
            _ => None,
        }
    }

    /// Name of a symbol.
    pub fn symbol_name(&self) -> Option<&'a str> {
        match self.kind() {
            SexpKind::Symbol => self.text(),
            _ => None,
        }
    }

    /// Value of a single string (`XT_STR`).
    pub fn as_str(&self) -> Option<&'a str> {
        match self.kind() {
            SexpKind::String => self.text(),
            _ => None,
        }
    }

    /// Element `index` of a string array. The outer `None` means out of
    /// range; the inner one means NA or text that is not UTF-8.
    pub fn string_opt_at(&self, index: usize) -> Option<Option<&'a str>> {
        match &self.node().data {
            NodeData::Strings(items) => items.get(index).map(|item| {
                item.as_ref()
                    .and_then(|range| std::str::from_utf8(self.slice(range)).ok())
            }),
            _ => None,
        }
    }

    /// Element `index` of a string array; `None` if out of range or NA.
    pub fn string_at(&self, index: usize) -> Option<&'a str> {
        self.string_opt_at(index).flatten()
    }

    /// All elements of a string array.
    pub fn strings(&self) -> Vec<Option<&'a str>> {
        (0..self.len())
            .map_while(|i| self.string_opt_at(i))
            .collect()
    }

    /// Position of `needle` among the elements of a string array, or among
    /// the `XT_STR` children of a vector.
    pub fn index_of_string(&self, needle: &str) -> Option<usize> {
        match self.kind() {
            SexpKind::StringArray => (0..self.len()).find(|&i| self.string_at(i) == Some(needle)),
            SexpKind::Vector => self
                .children()
                .position(|child| child.as_str() == Some(needle)),
            _ => None,
        }
    }

    // Vectors

    /// Children of a vector; empty for other kinds.
    pub fn children(&self) -> impl Iterator<Item = Sexp<'a>> + 'a {
        let rexp = self.rexp;
        self.child_ids().iter().map(move |&id| Sexp::new(rexp, id))
    }

    /// Child `index` of a vector, or value `index` of a list.
    pub fn element_at(&self, index: usize) -> Option<Sexp<'a>> {
        match self.kind() {
            SexpKind::Vector => self.child_ids().get(index).map(|&id| self.view(id)),
            SexpKind::List(_) => self.entry_slice().get(index).map(|e| self.view(e.value)),
            _ => None,
        }
    }

    /// Looks up a vector child through its `names` attribute.
    ///
    /// The attribute must be an `XT_LIST` or `XT_LIST_TAG`. When its first
    /// cell is tagged the `names` entry is used, otherwise its head. The
    /// names themselves may be a vector of strings, a string array or a
    /// single string.
    pub fn by_name(&self, name: &str) -> Option<Sexp<'a>> {
        if self.kind() != SexpKind::Vector || self.child_ids().is_empty() {
            return None;
        }
        let attrs = self.attributes()?;
        if attrs.type_code() != xt::LIST && attrs.type_code() != xt::LIST_TAG {
            return None;
        }
        let names = if attrs.tag().is_some() {
            attrs.entry_by_tag_name("names")?
        } else {
            attrs.head()?
        };
        let index = match names.kind() {
            SexpKind::Vector | SexpKind::StringArray => names.index_of_string(name)?,
            SexpKind::String if names.as_str() == Some(name) => 0,
            _ => return None,
        };
        self.element_at(index)
    }

    // Lists

    /// First value of a list (or of this tail view).
    pub fn head(&self) -> Option<Sexp<'a>> {
        self.entry_slice().first().map(|e| self.view(e.value))
    }

    /// Tag of the first entry.
    pub fn tag(&self) -> Option<Sexp<'a>> {
        self.entry_slice()
            .first()
            .and_then(|e| e.tag)
            .map(|id| self.view(id))
    }

    /// The list without its first entry; `None` at the last entry.
    pub fn tail(&self) -> Option<Sexp<'a>> {
        if self.entry_slice().len() > 1 {
            Some(Sexp {
                cursor: self.cursor + 1,
                ..*self
            })
        } else {
            None
        }
    }

    /// `(value, tag)` pairs from this position to the end of the list.
    pub fn entries(&self) -> impl Iterator<Item = (Sexp<'a>, Option<Sexp<'a>>)> + 'a {
        let rexp = self.rexp;
        self.entry_slice().iter().map(move |e| {
            (
                Sexp::new(rexp, e.value),
                e.tag.map(|id| Sexp::new(rexp, id)),
            )
        })
    }

    /// Value of the first entry whose tag is a symbol named `name`.
    pub fn entry_by_tag_name(&self, name: &str) -> Option<Sexp<'a>> {
        self.entries()
            .find(|(_, tag)| tag.and_then(|t| t.symbol_name()) == Some(name))
            .map(|(value, _)| value)
    }
}

impl PartialEq for Sexp<'_> {
    /// Structural equality: same type, attributes and content.
    fn eq(&self, other: &Self) -> bool {
        if self.type_code() != other.type_code() {
            return false;
        }
        match (self.attributes(), other.attributes()) {
            (None, None) => {}
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
        match self.kind() {
            SexpKind::Vector => self.children().eq(other.children()),
            SexpKind::List(_) => self.entries().eq(other.entries()),
            _ => self.content() == other.content(),
        }
    }
}

impl fmt::Display for Sexp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SexpKind::Null => write!(f, "Rnull"),
            SexpKind::Integer => write!(f, "Rinteger[{}]", self.len()),
            SexpKind::Double => write!(f, "Rdouble[{}]", self.len()),
            SexpKind::Symbol => write!(f, "Rsymbol[{}]", self.symbol_name().unwrap_or("")),
            SexpKind::StringArray => write!(
                f,
                "char*[{}]\"{}\"..",
                self.len(),
                self.string_at(0).unwrap_or("")
            ),
            SexpKind::String => write!(f, "\"{}\"", self.as_str().unwrap_or("")),
            SexpKind::Vector => {
                write!(f, "Rvector[count={}:", self.len())?;
                for (i, child) in self.children().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, "]")
            }
            SexpKind::List(_) => {
                // Tails nest inside their cell
                let mut cells = 0;
                for (head, tag) in self.entries() {
                    if cells > 0 {
                        write!(f, ",tail=")?;
                    }
                    write!(f, "Rlist[tag=")?;
                    match tag {
                        Some(tag) => write!(f, "{}", tag)?,
                        None => write!(f, "<none>")?,
                    }
                    write!(f, ",head={}", head)?;
                    cells += 1;
                }
                if cells == 0 {
                    return write!(f, "Rlist[tag=<none>,head=<none>]");
                }
                for _ in 0..cells {
                    write!(f, "]")?;
                }
                Ok(())
            }
            SexpKind::Unknown(t) => write!(f, "Rexp[type={},len={}]", t, self.byte_len()),
        }
    }
}

impl fmt::Debug for Sexp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ParamHeader, MAX_SHORT_LENGTH};
    use bytes::BufMut;
    use proptest::prelude::*;

    fn roundtrip(value: &Rexp) -> Rexp {
        let encoded = value.to_bytes();
        assert_eq!(encoded.len(), value.storage_size());
        assert_eq!(encoded.len() % 4, 0);
        let len = encoded.len();
        let decoded = Rexp::parse(encoded, 0..len).unwrap();
        assert_eq!(decoded.root().next_offset(), len);
        decoded
    }

    #[test]
    fn test_integer_array() {
        let value = Rexp::integers(&[1, -2, 3]);
        let root = value.root();
        assert_eq!(root.kind(), SexpKind::Integer);
        assert_eq!(root.type_code(), xt::ARRAY_INT);
        assert_eq!(root.len(), 3);
        assert_eq!(root.int_at(1), -2);
        assert_eq!(root.int_at(3), 0);
        assert_eq!(root.double_at(0), 0.0);
        assert_eq!(root.to_string(), "Rinteger[3]");
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn test_double_array_wire_order() {
        let value = Rexp::doubles(&[2.0]);
        let encoded = value.to_bytes();
        assert_eq!(&encoded[..4], &[xt::ARRAY_DOUBLE, 8, 0, 0]);
        assert_eq!(&encoded[4..], &2.0f64.to_le_bytes());

        let decoded = roundtrip(&value);
        assert_eq!(decoded.root().doubles(), Some(vec![2.0]));
        assert_eq!(decoded.root().double_at(0), 2.0);
        assert_eq!(decoded.root().double_at(7), 0.0);
    }

    #[test]
    fn test_empty_values() {
        for value in [
            Rexp::integers(&[]),
            Rexp::doubles(&[]),
            Rexp::strings::<&str>(&[]),
            Rexp::list(&[]),
            Rexp::vector(&[]),
            Rexp::null(),
        ] {
            let decoded = roundtrip(&value);
            assert!(decoded.root().is_empty(), "{}", decoded);
            assert_eq!(decoded, value);
        }
        assert_eq!(Rexp::string("").root().as_str(), Some(""));
    }

    #[test]
    fn test_string_array_split_and_padding() {
        let value = Rexp::strings(&["a", "bc"]);
        // "a\0bc\0" padded with 0x01 to 8 bytes
        assert_eq!(
            &value.to_bytes()[..],
            &[xt::ARRAY_STR, 8, 0, 0, b'a', 0, b'b', b'c', 0, 1, 1, 1]
        );
        let decoded = roundtrip(&value);
        assert_eq!(decoded.root().len(), 2);
        assert_eq!(decoded.root().strings(), vec![Some("a"), Some("bc")]);
        assert_eq!(decoded.root().to_string(), "char*[2]\"a\"..");
    }

    #[test]
    fn test_string_array_na_and_escape() {
        let value = Rexp::strings_with_na(&[Some("x"), None, Some("")]);
        let decoded = roundtrip(&value);
        assert_eq!(decoded.root().strings(), vec![Some("x"), None, Some("")]);
        assert_eq!(decoded.root().string_opt_at(1), Some(None));
        assert_eq!(decoded.root().string_opt_at(3), None);

        // An escaped leading 0xFF is a literal element, a lone 0xFF is NA
        let raw = Rexp::from_parts(xt::ARRAY_STR, &[0xff, 0xff, b'a', 0, 0xff, 0]).unwrap();
        assert_eq!(raw.root().len(), 2);
        assert_eq!(raw.root().string_opt_at(1), Some(None));
        let first = raw.root().string_opt_at(0);
        assert_eq!(first, Some(None), "0xFF 'a' is not UTF-8");
    }

    #[test]
    fn test_string_array_drops_unterminated_tail() {
        let raw = Rexp::from_parts(xt::ARRAY_STR, b"ab\0cd").unwrap();
        assert_eq!(raw.root().strings(), vec![Some("ab")]);
        assert_eq!(raw.root().index_of_string("ab"), Some(0));
        assert_eq!(raw.root().index_of_string("cd"), None);
    }

    #[test]
    fn test_single_string_and_symbol() {
        let s = roundtrip(&Rexp::string("hello"));
        assert_eq!(s.root().kind(), SexpKind::String);
        assert_eq!(s.root().as_str(), Some("hello"));
        assert_eq!(s.root().to_string(), "\"hello\"");

        let sym = roundtrip(&Rexp::symbol("names"));
        assert_eq!(sym.root().type_code(), xt::SYMNAME);
        assert_eq!(sym.root().symbol_name(), Some("names"));
        assert_eq!(sym.root().to_string(), "Rsymbol[names]");
    }

    #[test]
    fn test_xt_sym_wraps_string() {
        let mut content = Vec::new();
        ParamHeader::new(xt::STR, 4).put(&mut content);
        content.put_slice(b"dim\0");
        let sym = Rexp::from_parts(xt::SYM, &content).unwrap();
        assert_eq!(sym.root().kind(), SexpKind::Symbol);
        assert_eq!(sym.root().symbol_name(), Some("dim"));
    }

    #[test]
    fn test_vector_children() {
        let value = Rexp::vector(&[
            Rexp::integers(&[1]),
            Rexp::string("b"),
            Rexp::doubles(&[0.5, 1.5]),
        ]);
        let decoded = roundtrip(&value);
        let root = decoded.root();
        assert_eq!(root.kind(), SexpKind::Vector);
        assert_eq!(root.len(), 3);
        let kinds: Vec<_> = root.children().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![SexpKind::Integer, SexpKind::String, SexpKind::Double]
        );
        assert_eq!(root.element_at(2).unwrap().double_at(1), 1.5);
        assert!(root.element_at(3).is_none());
        assert_eq!(root.index_of_string("b"), Some(1));
        assert_eq!(
            root.to_string(),
            "Rvector[count=3:Rinteger[1],\"b\",Rdouble[2]]"
        );

        // Siblings are laid out back to back
        let offsets: Vec<_> = root.children().map(|c| (c.offset(), c.next_offset())).collect();
        for pair in offsets.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(offsets.last().unwrap().1, root.next_offset());
    }

    #[test]
    fn test_untagged_list_rethreading() {
        let value = Rexp::list(&[
            Rexp::integers(&[1]),
            Rexp::integers(&[2]),
            Rexp::integers(&[3]),
        ]);
        let decoded = roundtrip(&value);
        let root = decoded.root();
        assert_eq!(root.kind(), SexpKind::List(ListEncoding::Untagged));

        let mut seen = Vec::new();
        let mut cell = Some(root);
        while let Some(c) = cell {
            assert!(c.tag().is_none());
            seen.push(c.head().unwrap().int_at(0));
            cell = c.tail();
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(root.tail().unwrap().len(), 2);
    }

    #[test]
    fn test_tagged_list_preserves_tags() {
        let value = Rexp::tagged_list(&[
            ("a", Rexp::integers(&[1])),
            ("b", Rexp::string("two")),
        ]);
        let decoded = roundtrip(&value);
        let root = decoded.root();
        assert_eq!(root.kind(), SexpKind::List(ListEncoding::Tagged));

        let tags: Vec<_> = root
            .entries()
            .map(|(_, tag)| tag.and_then(|t| t.symbol_name()).unwrap())
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(root.entry_by_tag_name("b").unwrap().as_str(), Some("two"));
        assert!(root.entry_by_tag_name("c").is_none());
        assert_eq!(root.tail().unwrap().tag().unwrap().symbol_name(), Some("b"));
        assert_eq!(
            root.to_string(),
            "Rlist[tag=Rsymbol[a],head=Rinteger[1],tail=Rlist[tag=Rsymbol[b],head=\"two\"]]"
        );
    }

    #[test]
    fn test_legacy_list_cells() {
        // (1 . (2 . NULL)) with a tag on the first cell only
        let mut inner = Vec::new();
        inner.put_slice(&Rexp::integers(&[2]).to_bytes());
        let inner = Rexp::from_parts(xt::LIST, &inner).unwrap();

        let mut outer = Vec::new();
        outer.put_slice(&Rexp::integers(&[1]).to_bytes());
        outer.put_slice(&inner.to_bytes());
        outer.put_slice(&Rexp::symbol("first").to_bytes());
        let outer = Rexp::from_parts(xt::LIST, &outer).unwrap();

        let root = outer.root();
        assert_eq!(root.kind(), SexpKind::List(ListEncoding::Legacy));
        assert_eq!(root.len(), 2);
        assert_eq!(root.tag().unwrap().symbol_name(), Some("first"));
        let tail = root.tail().unwrap();
        assert_eq!(tail.head().unwrap().int_at(0), 2);
        assert!(tail.tag().is_none());
        assert!(tail.tail().is_none());
    }

    #[test]
    fn test_legacy_list_drops_non_list_tail() {
        let mut content = Vec::new();
        content.put_slice(&Rexp::integers(&[1]).to_bytes());
        content.put_slice(&Rexp::integers(&[9]).to_bytes());
        let value = Rexp::from_parts(xt::LIST, &content).unwrap();
        assert_eq!(value.root().len(), 1);
        assert!(value.root().tail().is_none());
    }

    #[test]
    fn test_attribute_roundtrip() {
        let attrs = Rexp::tagged_list(&[
            ("class", Rexp::strings(&["myclass"])),
            ("dim", Rexp::integers(&[2, 2])),
        ]);
        let value = Rexp::integers(&[1, 2, 3, 4]).with_attributes(&attrs);
        let decoded = roundtrip(&value);
        let root = decoded.root();

        assert!(root.has_attributes());
        assert_eq!(root.len(), 4);
        assert_eq!(root.byte_len(), 16);
        assert_eq!(root.integers(), Some(vec![1, 2, 3, 4]));
        assert_eq!(root.attribute_names(), vec!["class", "dim"]);
        assert_eq!(
            root.attribute("dim").unwrap().integers(),
            Some(vec![2, 2])
        );
        assert_eq!(
            root.attribute("class").unwrap().string_at(0),
            Some("myclass")
        );
        assert!(root.attribute("names").is_none());

        // The attribute sits between the header and the content
        let attr = root.attributes().unwrap();
        assert_eq!(attr.offset(), 4);
        assert_eq!(attr.next_offset() + 16, root.next_offset());
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_replacing_attributes() {
        let first = Rexp::tagged_list(&[("a", Rexp::integers(&[1]))]);
        let second = Rexp::tagged_list(&[("b", Rexp::integers(&[2]))]);
        let value = Rexp::doubles(&[1.0])
            .with_attributes(&first)
            .with_attributes(&second);
        let decoded = roundtrip(&value);
        assert_eq!(decoded.root().attribute_names(), vec!["b"]);
        assert_eq!(decoded.root().doubles(), Some(vec![1.0]));
    }

    #[test]
    fn test_vector_by_name() {
        let value = Rexp::named_vector(
            &["alpha", "beta"],
            &[Rexp::integers(&[1]), Rexp::doubles(&[2.5])],
        );
        let decoded = roundtrip(&value);
        let root = decoded.root();
        assert_eq!(root.by_name("beta").unwrap().double_at(0), 2.5);
        assert_eq!(root.by_name("alpha").unwrap().int_at(0), 1);
        assert!(root.by_name("gamma").is_none());

        // Untagged attribute lists never resolve names
        let attrs = Rexp::list(&[Rexp::strings(&["alpha"])]);
        let value = Rexp::vector(&[Rexp::integers(&[1])]).with_attributes(&attrs);
        assert!(value.root().by_name("alpha").is_none());
    }

    #[test]
    fn test_by_name_with_single_string_names() {
        let attrs = Rexp::tagged_list(&[("names", Rexp::string("only"))]);
        let value = Rexp::vector(&[Rexp::integers(&[7])]).with_attributes(&attrs);
        assert_eq!(value.root().by_name("only").unwrap().int_at(0), 7);

        // Wrongly typed names
        let attrs = Rexp::tagged_list(&[("names", Rexp::integers(&[0]))]);
        let value = Rexp::vector(&[Rexp::integers(&[7])]).with_attributes(&attrs);
        assert!(value.root().by_name("only").is_none());
    }

    #[test]
    fn test_unknown_type_is_skippable() {
        let value = Rexp::vector(&[
            Rexp::from_parts(xt::ARRAY_BOOL, &[1, 0, 0, 0, 1, 0, 0, 0]).unwrap(),
            Rexp::integers(&[5]),
        ]);
        let decoded = roundtrip(&value);
        let first = decoded.root().element_at(0).unwrap();
        assert_eq!(first.kind(), SexpKind::Unknown(xt::ARRAY_BOOL));
        assert_eq!(first.to_string(), "Rexp[type=36,len=8]");
        assert_eq!(decoded.root().element_at(1).unwrap().int_at(0), 5);
    }

    #[test]
    fn test_large_length_boundary() {
        // Largest aligned content that fits the short form
        let below = Rexp::integers(&vec![0; (MAX_SHORT_LENGTH - 3) / 4]);
        assert_eq!(below.storage_size(), 4 + MAX_SHORT_LENGTH - 3);
        let encoded = below.to_bytes();
        assert_eq!(encoded[0] & xt::LARGE, 0);

        let above = Rexp::integers(&vec![7; (MAX_SHORT_LENGTH + 1) / 4]);
        assert_eq!(above.storage_size(), 8 + MAX_SHORT_LENGTH + 1);
        let encoded = above.to_bytes();
        assert_eq!(encoded[0], xt::ARRAY_INT | xt::LARGE);

        let decoded = roundtrip(&above);
        assert_eq!(decoded.root().byte_len(), MAX_SHORT_LENGTH + 1);
        assert_eq!(decoded.root().int_at((MAX_SHORT_LENGTH + 1) / 4 - 1), 7);
    }

    #[test]
    fn test_malformed_inputs() {
        // Declared length overruns the buffer
        let buf = Bytes::from_static(&[xt::ARRAY_INT, 8, 0, 0, 1, 0, 0, 0]);
        assert!(matches!(
            Rexp::parse(buf, 0..8),
            Err(ProtocolError::MalformedSexp { .. })
        ));

        // Child overruns its vector
        let buf = Bytes::from_static(&[xt::VECTOR, 4, 0, 0, xt::ARRAY_INT, 4, 0, 0]);
        assert!(Rexp::parse(buf, 0..8).is_err());

        // Range outside the buffer
        let buf = Bytes::from_static(&[xt::NULL, 0, 0, 0]);
        assert!(Rexp::parse(buf, 0..16).is_err());
    }

    /// `levels` vectors nested around a NULL, written header by header.
    fn nested_vectors(levels: usize) -> Bytes {
        let mut buf = Vec::with_capacity(4 * (levels + 1));
        for level in 0..levels {
            ParamHeader::new(xt::VECTOR, 4 * (levels - level)).put(&mut buf);
        }
        ParamHeader::new(xt::NULL, 0).put(&mut buf);
        Bytes::from(buf)
    }

    #[test]
    fn test_nesting_limit() {
        let encoded = nested_vectors(MAX_DEPTH + 1);
        let len = encoded.len();
        assert!(matches!(
            Rexp::parse(encoded, 0..len),
            Err(ProtocolError::MalformedSexp {
                reason: "nesting too deep",
                ..
            })
        ));
    }

    #[test]
    fn test_deepest_tree_on_spawned_thread() {
        let len = std::thread::spawn(|| {
            let encoded = nested_vectors(MAX_DEPTH);
            let len = encoded.len();
            let decoded = Rexp::parse(encoded, 0..len).unwrap();

            let mut node = decoded.root();
            let mut levels = 0;
            while let Some(child) = node.element_at(0) {
                node = child;
                levels += 1;
            }
            assert_eq!(node.kind(), SexpKind::Null);
            assert_eq!(levels, MAX_DEPTH);

            // Nesting the decoded tree once more copies every level
            let wrapped = Rexp::vector(&[decoded]);
            assert_eq!(wrapped.node_count(), MAX_DEPTH + 2);
            assert!(wrapped.root().element_at(0).is_some());
            len
        })
        .join()
        .unwrap();
        assert_eq!(len, 4 * (MAX_DEPTH + 1));
    }

    #[test]
    fn test_display_long_list() {
        let values = vec![Rexp::null(); 100_000];
        let text = Rexp::list(&values).to_string();
        assert!(text.starts_with("Rlist[tag=<none>,head=Rnull,tail=Rlist["));
        assert!(text.ends_with("head=Rnull]]]"));
        assert_eq!(text.matches("Rlist[").count(), 100_000);
        assert_eq!(Rexp::list(&[]).to_string(), "Rlist[tag=<none>,head=<none>]");
    }

    #[test]
    fn test_parse_within_larger_buffer() {
        let mut buf = vec![0xaa; 8];
        buf.extend_from_slice(&Rexp::integers(&[4, 5]).to_bytes());
        let len = buf.len();
        let decoded = Rexp::parse(Bytes::from(buf), 8..len).unwrap();
        assert_eq!(decoded.root().offset(), 8);
        assert_eq!(decoded.root().integers(), Some(vec![4, 5]));
        // Re-encoding a value that lives mid-buffer yields the same bytes
        assert_eq!(decoded.to_bytes(), Rexp::integers(&[4, 5]).to_bytes());
    }

    fn leaf_strategy() -> impl Strategy<Value = Rexp> {
        prop_oneof![
            prop::collection::vec(any::<i32>(), 0..16).prop_map(|v| Rexp::integers(&v)),
            prop::collection::vec(any::<f64>(), 0..16).prop_map(|v| Rexp::doubles(&v)),
            prop::collection::vec(
                prop::option::of("[a-zA-Z0-9 _.]{0,12}"),
                0..8
            )
            .prop_map(|v| {
                let refs: Vec<Option<&str>> = v.iter().map(|s| s.as_deref()).collect();
                Rexp::strings_with_na(&refs)
            }),
            "[a-z]{1,10}".prop_map(|s| Rexp::symbol(&s)),
            "[a-z ]{0,10}".prop_map(|s| Rexp::string(&s)),
            Just(Rexp::null()),
        ]
    }

    fn rexp_strategy() -> impl Strategy<Value = Rexp> {
        leaf_strategy().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(|v| Rexp::vector(&v)),
                prop::collection::vec(inner.clone(), 0..6).prop_map(|v| Rexp::list(&v)),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..6).prop_map(|v| {
                    let entries: Vec<(&str, Rexp)> =
                        v.iter().map(|(t, r)| (t.as_str(), r.clone())).collect();
                    Rexp::tagged_list(&entries)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(value in rexp_strategy()) {
            let encoded = value.to_bytes();
            prop_assert_eq!(encoded.len(), value.storage_size());
            prop_assert_eq!(encoded.len() % 4, 0);
            let len = encoded.len();
            let decoded = Rexp::parse(encoded, 0..len).unwrap();
            prop_assert_eq!(decoded.root().next_offset(), len);
            prop_assert_eq!(decoded.root().kind(), value.root().kind());
            prop_assert_eq!(decoded.root().len(), value.root().len());
            prop_assert!(decoded == value);
        }

        #[test]
        fn prop_children_stay_inside_parent(value in rexp_strategy()) {
            let root = value.root();
            for child in root.children() {
                prop_assert!(child.offset() >= root.offset());
                prop_assert!(child.next_offset() <= root.next_offset());
            }
            for (v, tag) in root.entries() {
                prop_assert!(v.next_offset() <= root.next_offset());
                if let Some(t) = tag {
                    prop_assert!(t.next_offset() <= root.next_offset());
                }
            }
        }

        #[test]
        fn prop_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let len = data.len();
            let _ = Rexp::parse(Bytes::from(data), 0..len);
        }
    }
}
