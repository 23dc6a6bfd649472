//! Hyperparameter grid specifications (`.hyper` files).
//!
//! A `.hyper` file declares one parameter per line:
//!
//! ```text
//! learning_rate choice [0.01,0.005,0.001]
//! embedding_size choice [64, 128]
//! n_layers choice range(1,4)
//! ```
//!
//! Lines are split on single spaces; a line is significant only when it has at
//! least three tokens. Tokens from index 2 onward are concatenated and parsed as
//! a sequence literal. Only list, tuple and `range(..)` literals are accepted,
//! nothing is ever evaluated. A `range(..)` nested inside a list counts as one
//! value, the list of its integers.

use crate::error::{CarbonError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// The values one parameter can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueRange {
    List { values: Vec<Value> },
    Range { start: i64, stop: i64, step: i64 },
}

impl ValueRange {
    /// Number of values in the range.
    pub fn len(&self) -> u64 {
        match self {
            Self::List { values } => values.len() as u64,
            Self::Range { start, stop, step } => range_len(*start, *stop, *step),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the values in declaration order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Self::List { values } => values.clone(),
            Self::Range { start, stop, step } => {
                let (stop, step) = (*stop, *step);
                std::iter::successors(Some(*start), move |v| v.checked_add(step))
                    .take_while(move |v| if step > 0 { *v < stop } else { *v > stop })
                    .map(Value::from)
                    .collect()
            }
        }
    }
}

fn range_len(start: i64, stop: i64, step: i64) -> u64 {
    let (lo, hi, step) = if step > 0 {
        (start as i128, stop as i128, step as i128)
    } else {
        (stop as i128, start as i128, -(step as i128))
    };
    if hi <= lo {
        return 0;
    }
    ((hi - lo + step - 1) / step) as u64
}

/// One declared hyperparameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParam {
    pub name: String,
    /// Second token of the line, e.g. `choice`.
    pub marker: String,
    pub range: ValueRange,
}

/// A single point of the grid: parameter name to value, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub entries: Vec<(String, Value)>,
}

impl GridPoint {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A parsed `.hyper` grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperGrid {
    pub params: Vec<HyperParam>,
}

impl HyperGrid {
    /// Parse a grid from the text of a `.hyper` file.
    pub fn parse(text: &str) -> Result<Self> {
        let mut params = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let tokens: Vec<&str> = line.trim().split(' ').collect();
            if tokens.len() < 3 {
                continue;
            }
            let expr = tokens[2..].concat();
            let range = parse_range_expr(&expr)
                .map_err(|reason| CarbonError::grid(idx + 1, expr.clone(), reason))?;
            if range.is_empty() {
                return Err(CarbonError::grid(idx + 1, expr, "empty value range"));
            }
            params.push(HyperParam {
                name: tokens[0].to_string(),
                marker: tokens[1].to_string(),
                range,
            });
        }
        Ok(Self { params })
    }

    /// Read and parse a `.hyper` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Total number of grid points; 1 for a grid without parameters.
    pub fn size(&self) -> Result<u64> {
        self.params.iter().try_fold(1u64, |acc, p| {
            acc.checked_mul(p.range.len())
                .ok_or(CarbonError::GridOverflow)
        })
    }

    /// Enumerate every grid point. The last parameter varies fastest.
    pub fn points(&self) -> Vec<GridPoint> {
        let mut points = vec![GridPoint::default()];
        for param in &self.params {
            let values = param.range.values();
            let mut next = Vec::with_capacity(points.len() * values.len());
            for point in &points {
                for value in &values {
                    let mut p = point.clone();
                    p.entries.push((param.name.clone(), value.clone()));
                    next.push(p);
                }
            }
            points = next;
        }
        points
    }
}

/// Read the grid declared in a `.hyper` file.
pub fn parse_grid(path: &Path) -> Result<HyperGrid> {
    HyperGrid::from_file(path)
}

/// Total number of grid-search combinations declared in a `.hyper` file.
pub fn total_iterations(path: &Path) -> Result<u64> {
    parse_grid(path)?.size()
}

/// Parse a sequence literal: `[..]`, `(..)` or `range(..)`.
pub fn parse_range_expr(text: &str) -> std::result::Result<ValueRange, String> {
    let mut parser = Parser::new(text);
    let range = parser.top_level()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(format!("unexpected trailing input at offset {}", parser.pos));
    }
    Ok(range)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> std::result::Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(c) => format!("expected '{expected}', found '{c}'"),
                None => format!("expected '{expected}', found end of input"),
            })
        }
    }

    fn top_level(&mut self) -> std::result::Result<ValueRange, String> {
        self.skip_ws();
        if self.rest().starts_with("range") {
            self.pos += "range".len();
            return self.range_call();
        }
        match self.value()? {
            Value::Array(values) => Ok(ValueRange::List { values }),
            other => Err(format!("not a sequence literal: {other}")),
        }
    }

    fn range_call(&mut self) -> std::result::Result<ValueRange, String> {
        self.expect('(')?;
        let mut args = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(')') {
                break;
            }
            let arg = self.number()?;
            match arg.as_i64() {
                Some(i) => args.push(i),
                None => return Err(format!("range() argument is not an integer: {arg}")),
            }
            if !self.eat(',') {
                self.expect(')')?;
                break;
            }
        }
        let (start, stop, step) = match args.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, step] => (*start, *stop, *step),
            _ => return Err(format!("range() takes 1 to 3 arguments, got {}", args.len())),
        };
        if step == 0 {
            return Err("range() step must not be zero".to_string());
        }
        Ok(ValueRange::Range { start, stop, step })
    }

    fn value(&mut self) -> std::result::Result<Value, String> {
        self.skip_ws();
        match self.peek() {
            Some('[') => {
                self.bump();
                let (items, _) = self.items(']')?;
                Ok(Value::Array(items))
            }
            Some('(') => {
                self.bump();
                let (mut items, trailing_comma) = self.items(')')?;
                // `(x)` is just a parenthesized value, `(x,)` is a tuple.
                if items.len() == 1 && !trailing_comma {
                    Ok(items.remove(0))
                } else {
                    Ok(Value::Array(items))
                }
            }
            Some('\'') | Some('"') => self.string(),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.keyword(),
            Some(c) => Err(format!("unexpected character '{c}'")),
            None => Err("unexpected end of input".to_string()),
        }
    }

    /// Comma-separated values up to `close`. Returns the items and whether a
    /// trailing comma was present.
    fn items(&mut self, close: char) -> std::result::Result<(Vec<Value>, bool), String> {
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            if self.eat(close) {
                return Ok((items, trailing_comma));
            }
            items.push(self.value()?);
            trailing_comma = self.eat(',');
            if !trailing_comma {
                self.expect(close)?;
                return Ok((items, false));
            }
        }
    }

    fn string(&mut self) -> std::result::Result<Value, String> {
        let quote = self.bump().ok_or("unexpected end of input")?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => return Err("unterminated string literal".to_string()),
                },
                Some(c) if c == quote => return Ok(Value::String(out)),
                Some(c) => out.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn number(&mut self) -> std::result::Result<Value, String> {
        self.skip_ws();
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    self.bump();
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.bump();
                    }
                    continue;
                }
                _ => break,
            }
            self.bump();
        }
        let literal: String = self.src[start..self.pos].chars().filter(|c| *c != '_').collect();
        if is_float {
            let f: f64 = literal
                .parse()
                .map_err(|_| format!("invalid float literal '{literal}'"))?;
            serde_json::Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| format!("non-finite float literal '{literal}'"))
        } else {
            literal
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("invalid integer literal '{literal}'"))
        }
    }

    fn keyword(&mut self) -> std::result::Result<Value, String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.bump();
        }
        match &self.src[start..self.pos] {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            // Nested ranges are materialized; only a top-level range stays lazy.
            "range" => Ok(Value::Array(self.range_call()?.values())),
            other => Err(format!("unsupported name '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_size_is_product_of_cardinalities() {
        let grid = HyperGrid::parse(
            "learning_rate choice [0.01,0.005,0.001]\n\
             embedding_size choice [64,128]\n\
             reg_weight choice [1e-4,1e-3,1e-2,1e-1]\n",
        )
        .unwrap();
        assert_eq!(grid.params.len(), 3);
        assert_eq!(grid.size().unwrap(), 24);
    }

    #[test]
    fn test_short_lines_are_skipped() {
        let grid = HyperGrid::parse("\n#grid\nfoo bar\n   \n").unwrap();
        assert!(grid.params.is_empty());
        assert_eq!(grid.size().unwrap(), 1);
    }

    #[test]
    fn test_tokens_after_marker_are_joined() {
        let grid = HyperGrid::parse("dropout choice [0.1, 0.2, 0.3]").unwrap();
        assert_eq!(grid.params[0].range.len(), 3);
        assert_eq!(grid.params[0].marker, "choice");
    }

    #[test]
    fn test_unbalanced_bracket_is_an_error() {
        let err = HyperGrid::parse("a choice [1,2,3]\nb choice [1,2\n").unwrap_err();
        match err {
            CarbonError::Grid { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "[1,2");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_arbitrary_code_is_rejected() {
        assert!(parse_range_expr("__import__('os').system('ls')").is_err());
        assert!(parse_range_expr("[1,2]+[3]").is_err());
        assert!(parse_range_expr("foo").is_err());
    }

    #[test]
    fn test_empty_list_is_an_error() {
        assert!(HyperGrid::parse("a choice []").is_err());
        assert!(HyperGrid::parse("a choice range(5,1)").is_err());
    }

    #[test]
    fn test_bare_scalar_is_not_a_sequence() {
        assert!(parse_range_expr("5").is_err());
        assert!(parse_range_expr("(5)").is_err());
        assert!(parse_range_expr("'abc'").is_err());
    }

    #[test]
    fn test_tuple_literals() {
        assert_eq!(parse_range_expr("(5,)").unwrap().len(), 1);
        assert_eq!(parse_range_expr("(1,2,3)").unwrap().len(), 3);
        assert_eq!(parse_range_expr("([1,2,3])").unwrap().len(), 3);
    }

    #[test]
    fn test_range_cardinality_matches_python() {
        assert_eq!(parse_range_expr("range(4)").unwrap().len(), 4);
        assert_eq!(parse_range_expr("range(1,4)").unwrap().len(), 3);
        assert_eq!(parse_range_expr("range(0,10,3)").unwrap().len(), 4);
        assert_eq!(parse_range_expr("range(10,0,-3)").unwrap().len(), 4);
        assert!(parse_range_expr("range(1,4,0)").is_err());
        assert!(parse_range_expr("range(1.5)").is_err());
    }

    #[test]
    fn test_range_values() {
        let range = parse_range_expr("range(10,0,-4)").unwrap();
        assert_eq!(range.values(), vec![json!(10), json!(6), json!(2)]);
    }

    #[test]
    fn test_range_values_near_integer_bounds() {
        let range = parse_range_expr(
            "range(-9223372036854775808,9223372036854775807,4611686018427387904)",
        )
        .unwrap();
        assert_eq!(range.len(), 4);
        assert_eq!(
            range.values(),
            vec![
                json!(i64::MIN),
                json!(-4611686018427387904i64),
                json!(0),
                json!(4611686018427387904i64),
            ]
        );

        let range = parse_range_expr("range(9223372036854775807,9223372036854775800,-3)").unwrap();
        assert_eq!(range.values().len() as u64, range.len());
        assert_eq!(range.values()[2], json!(9223372036854775801i64));
    }

    #[test]
    fn test_nested_range_is_one_value() {
        let range = parse_range_expr("[range(3), 5]").unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range.values(), vec![json!([0, 1, 2]), json!(5)]);
        assert!(parse_range_expr("[range(1,2,0)]").is_err());
    }

    #[test]
    fn test_scalar_kinds() {
        let range = parse_range_expr("['adam',\"sgd\",True,None,-3,2.5e-1,[64,64]]").unwrap();
        assert_eq!(
            range.values(),
            vec![
                json!("adam"),
                json!("sgd"),
                json!(true),
                Value::Null,
                json!(-3),
                json!(0.25),
                json!([64, 64]),
            ]
        );
    }

    #[test]
    fn test_points_enumeration_order() {
        let grid = HyperGrid::parse("a choice [1,2]\nb choice ['x','y']").unwrap();
        let points = grid.points();
        assert_eq!(points.len() as u64, grid.size().unwrap());
        assert_eq!(points[0].get("a"), Some(&json!(1)));
        assert_eq!(points[0].get("b"), Some(&json!("x")));
        assert_eq!(points[1].get("a"), Some(&json!(1)));
        assert_eq!(points[1].get("b"), Some(&json!("y")));
        assert_eq!(points[2].get("a"), Some(&json!(2)));
    }

    #[test]
    fn test_total_iterations_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BPR.hyper");
        std::fs::write(
            &path,
            "learning_rate choice [0.05,0.01,0.005]\nembedding_size choice [32,64]\n",
        )
        .unwrap();
        assert_eq!(total_iterations(&path).unwrap(), 6);
    }

    #[test]
    fn test_missing_file_propagates_io_error() {
        let err = total_iterations(Path::new("/nonexistent/grid.hyper")).unwrap_err();
        assert!(matches!(err, CarbonError::Io(_)));
    }
}
