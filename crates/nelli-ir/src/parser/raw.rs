//! Raw (unresolved) parse structures and winnow combinators for the text format.
//!
//! Stage one of parsing: text to `Raw*` structs. Names are resolved later by
//! the builder in the parent module.

use winnow::ascii;
use winnow::combinator::{alt, delimited, opt, preceded, separated};
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

// ============================================================================
// Error type
// ============================================================================

/// Parse error for the IR text format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error at offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

// ============================================================================
// Raw (unresolved) AST structures
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct RawOperation<'a> {
    pub results: Vec<&'a str>,
    pub dialect: &'a str,
    pub op_name: &'a str,
    /// `@name` after `dialect.op`.
    pub sym_name: Option<String>,
    /// Function-style parameters: `(%arg: type, ...)`.
    pub func_params: Vec<(&'a str, RawType<'a>)>,
    /// `-> type`
    pub return_type: Option<RawType<'a>>,
    pub operands: Vec<&'a str>,
    pub attributes: Vec<(&'a str, RawAttribute<'a>)>,
    pub result_types: Vec<RawType<'a>>,
    pub regions: Vec<RawRegion<'a>>,
    pub successors: Vec<&'a str>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawRegion<'a> {
    pub blocks: Vec<RawBlock<'a>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawBlock<'a> {
    pub label: &'a str,
    pub args: Vec<(&'a str, RawType<'a>)>,
    pub ops: Vec<RawOperation<'a>>,
}

#[derive(Debug, Clone)]
pub(crate) struct RawType<'a> {
    pub dialect: &'a str,
    pub name: &'a str,
    pub params: Vec<RawType<'a>>,
    pub attrs: Vec<(&'a str, RawAttribute<'a>)>,
}

#[derive(Debug, Clone)]
pub(crate) enum RawAttribute<'a> {
    Bool(bool),
    Int(u64),
    Float(f64),
    String(String),
    Symbol(String),
    Type(RawType<'a>),
    List(Vec<RawAttribute<'a>>),
    Unit,
}

fn backtrack<T>() -> ModalResult<T> {
    Err(ErrMode::Backtrack(ContextError::new()))
}

// ============================================================================
// Winnow parsers
// ============================================================================

/// Skip whitespace.
pub(crate) fn ws(input: &mut &str) -> ModalResult<()> {
    take_while(0.., |c: char| c.is_ascii_whitespace())
        .void()
        .parse_next(input)
}

/// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
pub(crate) fn ident<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// `%name` or `%number`
pub(crate) fn value_ref<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded(
        '%',
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
    .parse_next(input)
}

/// `@name` or `@"quoted name"` (same escapes as string literals).
pub(crate) fn symbol_ref(input: &mut &str) -> ModalResult<String> {
    '@'.parse_next(input)?;
    if input.starts_with('"') {
        string_lit.parse_next(input)
    } else {
        take_while(1.., |c: char| c.is_alphanumeric() || c == '_')
            .map(|s: &str| s.to_owned())
            .parse_next(input)
    }
}

/// `^bbN` or `^name`
pub(crate) fn block_label<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    preceded(
        '^',
        take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
    .parse_next(input)
}

/// `dialect.name`
pub(crate) fn qualified_name<'a>(input: &mut &'a str) -> ModalResult<(&'a str, &'a str)> {
    (ident, '.', ident)
        .map(|(d, _, n)| (d, n))
        .parse_next(input)
}

/// Integer literal; negatives are stored as two's complement.
pub(crate) fn integer_lit(input: &mut &str) -> ModalResult<u64> {
    let negative = opt('-').parse_next(input)?.is_some();
    let value: u64 = ascii::dec_uint(input)?;
    if !negative {
        return Ok(value);
    }
    let min_magnitude = i64::MAX as u64 + 1;
    match value {
        v if v > min_magnitude => backtrack(),
        v if v == min_magnitude => Ok(i64::MIN as u64),
        v => Ok((-(v as i64)) as u64),
    }
}

/// Float literal with a mandatory decimal point (`3.5`, `-1.0e10`), or one
/// of `inf`, `-inf`, `NaN`. Plain `42` is left to [`integer_lit`].
pub(crate) fn float_lit(input: &mut &str) -> ModalResult<f64> {
    alt((
        "-inf".value(f64::NEG_INFINITY),
        "inf".value(f64::INFINITY),
        "NaN".value(f64::NAN),
        float_with_dot,
    ))
    .parse_next(input)
}

fn float_with_dot(input: &mut &str) -> ModalResult<f64> {
    let s = (
        opt('-'),
        take_while(1.., |c: char| c.is_ascii_digit()),
        '.',
        take_while(1.., |c: char| c.is_ascii_digit()),
        opt((
            one_of(['e', 'E']),
            opt(one_of(['+', '-'])),
            take_while(1.., |c: char| c.is_ascii_digit()),
        )),
    )
        .take()
        .parse_next(input)?;
    s.parse::<f64>().or_else(|_| backtrack())
}

/// `"content"` with `\\ \" \n \t \r \0 \xNN` escapes.
pub(crate) fn string_lit(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut result = String::new();
    loop {
        match any.parse_next(input)? {
            '"' => break,
            '\\' => {
                let escaped = any.parse_next(input)?;
                match escaped {
                    '"' => result.push('"'),
                    '\\' => result.push('\\'),
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    '0' => result.push('\0'),
                    'x' => {
                        let h1 = any.parse_next(input)?;
                        let h2 = any.parse_next(input)?;
                        match u8::from_str_radix(&format!("{h1}{h2}"), 16) {
                            Ok(code) => result.push(code as char),
                            Err(_) => {
                                result.push_str("\\x");
                                result.push(h1);
                                result.push(h2);
                            }
                        }
                    }
                    other => {
                        result.push('\\');
                        result.push(other);
                    }
                }
            }
            c => result.push(c),
        }
    }
    Ok(result)
}

/// `dialect.name`, `dialect.name(params)`, or `dialect.name(params) {attrs}`.
///
/// Type attributes are only recognized after explicit parentheses, so the
/// `{` of a following region is never mistaken for them.
pub(crate) fn raw_type<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    let (dialect, name) = qualified_name.parse_next(input)?;

    let params = opt(delimited(
        ('(', ws),
        separated(0.., (ws, raw_type, ws).map(|(_, t, _)| t), ','),
        (ws, ')'),
    ))
    .parse_next(input)?;

    let attrs = if params.is_some() {
        opt(preceded(ws, raw_attr_dict))
            .parse_next(input)?
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    Ok(RawType {
        dialect,
        name,
        params: params.unwrap_or_default(),
        attrs,
    })
}

pub(crate) fn raw_attr_value<'a>(input: &mut &'a str) -> ModalResult<RawAttribute<'a>> {
    alt((
        "true".value(RawAttribute::Bool(true)),
        "false".value(RawAttribute::Bool(false)),
        "unit".value(RawAttribute::Unit),
        string_lit.map(RawAttribute::String),
        symbol_ref.map(RawAttribute::Symbol),
        delimited(
            ('[', ws),
            separated(0.., (ws, raw_attr_value, ws).map(|(_, a, _)| a), ','),
            (ws, ']'),
        )
        .map(RawAttribute::List),
        float_lit.map(RawAttribute::Float),
        integer_lit.map(RawAttribute::Int),
        raw_type.map(RawAttribute::Type),
    ))
    .parse_next(input)
}

/// `{key = value, ...}` with at least one entry. Printers never emit `{}`
/// as a dictionary, which keeps empty regions unambiguous.
pub(crate) fn raw_attr_dict<'a>(
    input: &mut &'a str,
) -> ModalResult<Vec<(&'a str, RawAttribute<'a>)>> {
    delimited(
        ('{', ws),
        separated(
            1..,
            (ws, ident, ws, '=', ws, raw_attr_value, ws).map(|(_, k, _, _, _, v, _)| (k, v)),
            ',',
        ),
        (ws, '}'),
    )
    .parse_next(input)
}

/// `%0 =` or `%0, %1 =`
fn result_list<'a>(input: &mut &'a str) -> ModalResult<Vec<&'a str>> {
    let results: Vec<&str> =
        separated(1.., (ws, value_ref, ws).map(|(_, v, _)| v), ',').parse_next(input)?;
    ws.parse_next(input)?;
    '='.parse_next(input)?;
    Ok(results)
}

fn operand_list<'a>(input: &mut &'a str) -> ModalResult<Vec<&'a str>> {
    separated(1.., (ws, value_ref, ws).map(|(_, v, _)| v), ',').parse_next(input)
}

/// `: type1, type2`
fn type_annotation<'a>(input: &mut &'a str) -> ModalResult<Vec<RawType<'a>>> {
    preceded(
        (ws, ':', ws),
        separated(1.., (ws, raw_type, ws).map(|(_, t, _)| t), ','),
    )
    .parse_next(input)
}

/// `(%arg: type, ...)`
fn typed_args<'a>(input: &mut &'a str) -> ModalResult<Vec<(&'a str, RawType<'a>)>> {
    delimited(
        ('(', ws),
        separated(
            0..,
            (ws, value_ref, ws, ':', ws, raw_type, ws).map(|(_, name, _, _, _, ty, _)| (name, ty)),
            ',',
        ),
        (ws, ')'),
    )
    .parse_next(input)
}

/// `-> type`
fn return_type<'a>(input: &mut &'a str) -> ModalResult<RawType<'a>> {
    preceded((ws, "->", ws), raw_type).parse_next(input)
}

/// `[^bb0, ^bb1]`
fn successor_list<'a>(input: &mut &'a str) -> ModalResult<Vec<&'a str>> {
    delimited(
        ('[', ws),
        separated(1.., (ws, block_label, ws).map(|(_, l, _)| l), ','),
        (ws, ']'),
    )
    .parse_next(input)
}

/// A single operation.
///
/// ```text
/// [results =] dialect.op [@symbol] [(%arg: type, ...) | operands]
///   [[successors]] [-> type] [{attrs}] [: types] [regions]
/// ```
pub(crate) fn raw_operation<'a>(input: &mut &'a str) -> ModalResult<RawOperation<'a>> {
    ws.parse_next(input)?;
    let results = opt(result_list).parse_next(input)?.unwrap_or_default();
    ws.parse_next(input)?;

    let (dialect, op_name) = qualified_name.parse_next(input)?;
    let sym_name = opt(preceded(ws, symbol_ref)).parse_next(input)?;

    let mut func_params = Vec::new();
    let mut operands = Vec::new();
    ws.parse_next(input)?;
    if input.starts_with('(') {
        func_params = typed_args.parse_next(input)?;
    } else if input.starts_with('%') {
        operands = operand_list.parse_next(input)?;
    }

    let successors = opt(preceded(ws, successor_list))
        .parse_next(input)?
        .unwrap_or_default();
    let return_type = opt(return_type).parse_next(input)?;
    let attributes = opt(preceded(ws, raw_attr_dict))
        .parse_next(input)?
        .unwrap_or_default();
    let result_types = opt(type_annotation).parse_next(input)?.unwrap_or_default();

    let mut regions = Vec::new();
    loop {
        ws.parse_next(input)?;
        if !input.starts_with('{') {
            break;
        }
        regions.push(raw_region.parse_next(input)?);
    }

    Ok(RawOperation {
        results,
        dialect,
        op_name,
        sym_name,
        func_params,
        return_type,
        operands,
        attributes,
        result_types,
        regions,
        successors,
    })
}

/// Operations up to the next block label or the closing brace.
fn raw_ops<'a>(input: &mut &'a str) -> ModalResult<Vec<RawOperation<'a>>> {
    let mut ops = Vec::new();
    loop {
        ws.parse_next(input)?;
        if input.starts_with('^') || input.starts_with('}') || input.is_empty() {
            return Ok(ops);
        }
        ops.push(raw_operation.parse_next(input)?);
    }
}

/// `^label(args): ops...`
pub(crate) fn raw_block<'a>(input: &mut &'a str) -> ModalResult<RawBlock<'a>> {
    ws.parse_next(input)?;
    let label = block_label.parse_next(input)?;
    let args = opt(typed_args).parse_next(input)?.unwrap_or_default();
    ws.parse_next(input)?;
    ':'.parse_next(input)?;
    let ops = raw_ops.parse_next(input)?;
    Ok(RawBlock { label, args, ops })
}

/// `{ ^bb0: ... ^bb1: ... }` or `{ ops... }` (one implicit block, possibly empty).
pub(crate) fn raw_region<'a>(input: &mut &'a str) -> ModalResult<RawRegion<'a>> {
    '{'.parse_next(input)?;
    ws.parse_next(input)?;

    let mut blocks = Vec::new();
    if input.starts_with('^') {
        loop {
            ws.parse_next(input)?;
            if input.starts_with('}') || input.is_empty() {
                break;
            }
            blocks.push(raw_block.parse_next(input)?);
        }
    } else {
        let ops = raw_ops.parse_next(input)?;
        if input.starts_with('^') {
            // Labels after unlabeled ops are not allowed.
            return backtrack();
        }
        blocks.push(RawBlock {
            label: "bb0",
            args: Vec::new(),
            ops,
        });
    }

    ws.parse_next(input)?;
    '}'.parse_next(input)?;
    Ok(RawRegion { blocks })
}
