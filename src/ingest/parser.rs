//! Per-domain line parsers that turn a batch of lines into typed columns.
use crate::dataframe::{Column, DataFrame};
use crate::error::LatticeError;
use crate::ingest::source::Block;
use crate::types::ElemType;
use log::error;

/// Vertex identifiers in edge lists.
pub type VertexId = i64;

/// Upper bound (exclusive) on vertex identifiers accepted from input.
pub const MAX_VERTEX_ID: VertexId = 1 << 48;

/// A parser turning a batch of lines into typed columns. Parsers declare
/// their output schema so the driver can build result frames up front, and
/// must be shareable across the parse tasks running them concurrently.
pub trait LineParser: Send + Sync {
    /// The number of columns this parser produces.
    fn num_cols(&self) -> usize;

    /// The name of output column `idx`.
    fn col_name(&self, idx: usize) -> &str;

    /// The element type of output column `idx`.
    fn col_type(&self, idx: usize) -> ElemType;

    /// Parse `lines` and append the accepted rows to `frame`'s columns.
    /// Returns the number of rows accepted; malformed lines are logged and
    /// skipped, they never fail the batch.
    fn parse(
        &self,
        lines: &[&[u8]],
        frame: &mut DataFrame,
    ) -> Result<usize, LatticeError>;
}

/// Split a block into lines: one slice per `'\n'`, the newline itself and a
/// `'\r'` before it stripped. A final line without a newline is kept.
pub fn split_lines(block: &Block) -> Vec<&[u8]> {
    let bytes = block.bytes();
    let mut lines = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            let mut end = i;
            if end > start && bytes[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(&bytes[start..end]);
            start = i + 1;
        }
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}

fn skip_space(line: &[u8]) -> &[u8] {
    let n = line
        .iter()
        .take_while(|b| b.is_ascii_whitespace())
        .count();
    &line[n..]
}

/// Parse a decimal vertex id prefix. Returns the id and the rest of the
/// line, or `None` when the prefix is not a digit or the id is out of range.
fn parse_vertex_id(line: &[u8]) -> Option<(VertexId, &[u8])> {
    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let mut id: VertexId = 0;
    for &b in &line[..digits] {
        id = id.checked_mul(10)?.checked_add((b - b'0') as VertexId)?;
    }
    if id >= MAX_VERTEX_ID {
        return None;
    }
    Some((id, &line[digits..]))
}

/// Parse the leading `source dest` pair shared by both edge parsers.
/// Logs and returns `None` for lines that are comments, blank or malformed.
fn parse_edge_prefix(line: &[u8]) -> Option<(VertexId, VertexId, &[u8])> {
    let rest = skip_space(line);
    if rest.is_empty() || rest[0] == b'#' {
        return None;
    }
    let (from, rest) = match parse_vertex_id(rest) {
        Some(x) => x,
        None => {
            error!(
                "the first entry isn't a vertex id: {}",
                String::from_utf8_lossy(line)
            );
            return None;
        }
    };
    let rest2 = skip_space(rest);
    if rest2.len() == rest.len() {
        error!(
            "there isn't a second entry: {}",
            String::from_utf8_lossy(line)
        );
        return None;
    }
    let (to, rest) = match parse_vertex_id(rest2) {
        Some(x) => x,
        None => {
            error!(
                "the second entry isn't a vertex id: {}",
                String::from_utf8_lossy(line)
            );
            return None;
        }
    };
    Some((from, to, rest))
}

/// Parses a line into an edge `(source, dest)`.
pub struct EdgeParser;

impl LineParser for EdgeParser {
    fn num_cols(&self) -> usize {
        2
    }

    fn col_name(&self, idx: usize) -> &str {
        if idx == 0 {
            "source"
        } else {
            "dest"
        }
    }

    fn col_type(&self, _idx: usize) -> ElemType {
        ElemType::of::<VertexId>()
    }

    fn parse(
        &self,
        lines: &[&[u8]],
        frame: &mut DataFrame,
    ) -> Result<usize, LatticeError> {
        let mut froms =
            Column::with_capacity(ElemType::of::<VertexId>(), lines.len());
        let mut tos =
            Column::with_capacity(ElemType::of::<VertexId>(), lines.len());
        let mut entry_idx = 0;
        for line in lines {
            let (from, to, _) = match parse_edge_prefix(line) {
                Some(x) => x,
                None => continue,
            };
            froms.push_i64(from)?;
            tos.push_i64(to)?;
            entry_idx += 1;
        }
        froms.truncate(entry_idx);
        tos.truncate(entry_idx);

        frame.get_vec_mut(0)?.append(froms)?;
        frame.get_vec_mut(1)?.append(tos)?;
        Ok(entry_idx)
    }
}

/// A numeric type usable as the third, attribute column of an edge list.
/// Sealed by the `"I" | "L" | "F" | "D"` codes accepted by
/// [`read_edge_list`](crate::ingest::read_edge_list).
pub trait EdgeAttr: Copy + Send + Sync + 'static {
    const ELEM: ElemType;

    fn parse_attr(token: &str) -> Option<Self>;

    fn push(self, col: &mut Column) -> Result<(), LatticeError>;
}

macro_rules! edge_attr {
    ($t:ty, $elem:ident, $push:ident) => {
        impl EdgeAttr for $t {
            const ELEM: ElemType = ElemType::$elem;

            fn parse_attr(token: &str) -> Option<Self> {
                token.parse().ok()
            }

            fn push(self, col: &mut Column) -> Result<(), LatticeError> {
                col.$push(self)
            }
        }
    };
}

edge_attr!(i32, I32, push_i32);
edge_attr!(i64, I64, push_i64);
edge_attr!(f32, F32, push_f32);
edge_attr!(f64, F64, push_f64);

/// Parses a line into an attributed edge `(source, dest, attr)`.
pub struct AttrEdgeParser<T: EdgeAttr> {
    _marker: std::marker::PhantomData<T>,
}

impl<T: EdgeAttr> AttrEdgeParser<T> {
    pub fn new() -> Self {
        AttrEdgeParser {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: EdgeAttr> Default for AttrEdgeParser<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: EdgeAttr> LineParser for AttrEdgeParser<T> {
    fn num_cols(&self) -> usize {
        3
    }

    fn col_name(&self, idx: usize) -> &str {
        match idx {
            0 => "source",
            1 => "dest",
            _ => "attr",
        }
    }

    fn col_type(&self, idx: usize) -> ElemType {
        match idx {
            0 | 1 => ElemType::of::<VertexId>(),
            _ => T::ELEM,
        }
    }

    fn parse(
        &self,
        lines: &[&[u8]],
        frame: &mut DataFrame,
    ) -> Result<usize, LatticeError> {
        let vertex = ElemType::of::<VertexId>();
        let mut froms = Column::with_capacity(vertex, lines.len());
        let mut tos = Column::with_capacity(vertex, lines.len());
        let mut attrs = Column::with_capacity(T::ELEM, lines.len());
        let mut entry_idx = 0;
        for line in lines {
            let (from, to, rest) = match parse_edge_prefix(line) {
                Some(x) => x,
                None => continue,
            };
            let token = skip_space(rest);
            if token.is_empty() {
                error!(
                    "there isn't a third entry: {}",
                    String::from_utf8_lossy(line)
                );
                continue;
            }
            let token = token
                .split(|b| b.is_ascii_whitespace())
                .next()
                .unwrap_or(&[]);
            let attr = std::str::from_utf8(token)
                .ok()
                .and_then(T::parse_attr);
            let attr = match attr {
                Some(a) => a,
                None => {
                    error!(
                        "the third entry isn't a valid attribute: {}",
                        String::from_utf8_lossy(line)
                    );
                    continue;
                }
            };
            froms.push_i64(from)?;
            tos.push_i64(to)?;
            attr.push(&mut attrs)?;
            entry_idx += 1;
        }
        froms.truncate(entry_idx);
        tos.truncate(entry_idx);
        attrs.truncate(entry_idx);

        frame.get_vec_mut(0)?.append(froms)?;
        frame.get_vec_mut(1)?.append(tos)?;
        frame.get_vec_mut(2)?.append(attrs)?;
        Ok(entry_idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataframe::TieredColumn;

    fn frame_for(parser: &dyn LineParser) -> DataFrame {
        let mut df = DataFrame::new();
        for i in 0..parser.num_cols() {
            df.add_vec(
                parser.col_name(i),
                TieredColumn::new(parser.col_type(i), true, None),
            )
            .unwrap();
        }
        df
    }

    #[test]
    fn test_edge_parser_accepts_and_skips() {
        let parser = EdgeParser;
        let mut df = frame_for(&parser);
        let lines: Vec<&[u8]> = vec![
            b"1 2",
            b"# a comment",
            b"  3\t4",
            b"",
            b"x y",
            b"5",
            b"6 seven",
            b"7 8",
        ];
        let accepted = parser.parse(&lines, &mut df).unwrap();
        assert_eq!(accepted, 3);
        assert_eq!(
            df.local_col(0).unwrap(),
            &Column::I64(vec![1, 3, 7])
        );
        assert_eq!(
            df.local_col(1).unwrap(),
            &Column::I64(vec![2, 4, 8])
        );
    }

    #[test]
    fn test_edge_parser_rejects_out_of_range() {
        let parser = EdgeParser;
        let mut df = frame_for(&parser);
        let big = format!("{} 1", MAX_VERTEX_ID);
        let lines: Vec<&[u8]> = vec![big.as_bytes(), b"1 2"];
        assert_eq!(parser.parse(&lines, &mut df).unwrap(), 1);
        assert_eq!(df.local_col(0).unwrap(), &Column::I64(vec![1]));
    }

    #[test]
    fn test_attr_parser_f64() {
        let parser: AttrEdgeParser<f64> = AttrEdgeParser::new();
        let mut df = frame_for(&parser);
        let lines: Vec<&[u8]> = vec![b"10  20  3.5", b"1 2", b"3 4 nope"];
        assert_eq!(parser.parse(&lines, &mut df).unwrap(), 1);
        assert_eq!(df.local_col(0).unwrap(), &Column::I64(vec![10]));
        assert_eq!(df.local_col(1).unwrap(), &Column::I64(vec![20]));
        assert_eq!(df.local_col(2).unwrap(), &Column::F64(vec![3.5]));
    }

    #[test]
    fn test_attr_parser_i32() {
        let parser: AttrEdgeParser<i32> = AttrEdgeParser::new();
        let mut df = frame_for(&parser);
        let lines: Vec<&[u8]> = vec![b"1 2 -9"];
        assert_eq!(parser.parse(&lines, &mut df).unwrap(), 1);
        assert_eq!(df.local_col(2).unwrap(), &Column::I32(vec![-9]));
    }
}
