// This module implements the declaration scanner that feeds the signature resolver.
// It is deliberately not a C parser: it only needs to find top-level function
// definitions and split their headers into return type, name, parameters and
// attributes. Bodies are skipped by brace matching and handed to the native compiler
// untouched.
//
// Scanning runs in three steps. Comments and preprocessor lines are blanked out in
// place so token positions still map to source lines and columns. The remaining text is
// tokenized. Then top-level statements are grouped: a statement ending in a brace block
// whose header has the shape `specifiers name ( params ) trailing-attributes` is a
// function definition. Aggregate definitions, initializers, prototypes and
// `static`/`inline` helpers are skipped.

//! Scanner for top-level C function definitions.

use crate::core::error::SourceLocation;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Number,
    Str,
    Punct,
    Ellipsis,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    text: String,
    line: u32,
    column: u32,
}

impl Token {
    fn is(&self, text: &str) -> bool {
        self.text == text && self.kind != TokenKind::Str
    }
}

/// A declared attribute, either an `__arm_*` keyword or a GNU `__attribute__`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// String-literal arguments, unquoted.
    pub args: Vec<String>,
    pub gnu: bool,
    /// Spelling as written, for reproducing the attribute in generated C.
    pub text: String,
}

/// A type as written in a declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    /// Base type with qualifiers removed and words joined by single spaces.
    pub base: String,
    /// Pointer depth; array parameters count as one level.
    pub pointer: u32,
    /// Full C spelling without the declarator name.
    pub spelling: String,
}

impl TypeName {
    pub fn is_void(&self) -> bool {
        self.base == "void" && self.pointer == 0
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CParam {
    pub name: Option<String>,
    pub ty: TypeName,
}

/// A top-level function definition found in a source unit.
#[derive(Debug, Clone)]
pub struct CDeclaration {
    pub name: String,
    pub return_type: TypeName,
    pub params: Vec<CParam>,
    pub variadic: bool,
    pub attributes: Vec<Attribute>,
    pub location: SourceLocation,
}

const QUALIFIERS: &[&str] = &[
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "__restrict__",
    "register",
    "extern",
    "__extension__",
];

const SKIP_SPECIFIERS: &[&str] = &["static", "inline", "__inline", "__inline__"];

const TYPE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool",
];

/// Scan `text` for translatable function definitions.
pub fn scan_declarations(path: &Path, text: &str) -> Vec<CDeclaration> {
    let cleaned = blank_comments_and_directives(text);
    let tokens = tokenize(&cleaned);
    let mut decls = Vec::new();

    let mut i = 0;
    let mut stmt_start = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if tok.is(";") {
            stmt_start = i + 1;
            i += 1;
            continue;
        }
        if tok.is("(") {
            i = skip_group(&tokens, i, "(", ")");
            continue;
        }
        if tok.is("{") {
            let close = skip_group(&tokens, i, "{", "}");
            let header = &tokens[stmt_start..i];
            if is_aggregate_or_initializer(header) {
                // Keep collecting until the terminating semicolon.
                i = close;
                continue;
            }
            if let Some(decl) = parse_header(path, header) {
                decls.push(decl);
            }
            i = close;
            stmt_start = i;
            continue;
        }
        i += 1;
    }
    decls
}

fn is_aggregate_or_initializer(header: &[Token]) -> bool {
    let mut depth = 0i32;
    for tok in header {
        if tok.is("(") {
            depth += 1;
        } else if tok.is(")") {
            depth -= 1;
        } else if depth == 0
            && (tok.is("=")
                || tok.is("struct")
                || tok.is("union")
                || tok.is("enum")
                || tok.is("typedef"))
        {
            return true;
        }
    }
    false
}

/// Index just past the group opened at `open_idx`.
fn skip_group(tokens: &[Token], open_idx: usize, open: &str, close: &str) -> usize {
    let mut depth = 0usize;
    let mut i = open_idx;
    while i < tokens.len() {
        if tokens[i].is(open) {
            depth += 1;
        } else if tokens[i].is(close) {
            depth -= 1;
            if depth == 0 {
                return i + 1;
            }
        }
        i += 1;
    }
    tokens.len()
}

fn is_attribute_keyword(tok: &Token) -> bool {
    tok.kind == TokenKind::Ident && (tok.text.starts_with("__arm_") || tok.text == "__attribute__")
}

fn parse_header(path: &Path, header: &[Token]) -> Option<CDeclaration> {
    // Locate the declarator name: the first identifier at paren depth zero that opens
    // a parenthesized group and is not an attribute keyword.
    let mut depth = 0i32;
    let mut name_idx = None;
    for (i, tok) in header.iter().enumerate() {
        if tok.is("(") {
            depth += 1;
        } else if tok.is(")") {
            depth -= 1;
        } else if depth == 0
            && tok.kind == TokenKind::Ident
            && !is_attribute_keyword(tok)
            && header.get(i + 1).is_some_and(|t| t.is("("))
        {
            name_idx = Some(i);
            break;
        }
    }
    let name_idx = name_idx?;
    let params_end = skip_group(header, name_idx + 1, "(", ")");
    let name_tok = &header[name_idx];

    let mut attributes = Vec::new();
    let prefix = collect_attributes(&header[..name_idx], &mut attributes);
    let trailing = collect_attributes(&header[params_end..], &mut attributes);
    if !trailing.is_empty() {
        // Anything else after the parameter list is not a plain definition.
        log::debug!("skipping `{}`: unexpected tokens after parameters", name_tok.text);
        return None;
    }
    if prefix.iter().any(|t| SKIP_SPECIFIERS.contains(&t.text.as_str())) {
        log::debug!("skipping static or inline function `{}`", name_tok.text);
        return None;
    }
    if prefix.is_empty() {
        return None;
    }
    let return_type = type_name(&prefix);

    let inner = &header[name_idx + 2..params_end.saturating_sub(1)];
    let mut params = Vec::new();
    let mut variadic = false;
    for chunk in split_params(inner) {
        if chunk.len() == 1 && chunk[0].kind == TokenKind::Ellipsis {
            variadic = true;
            continue;
        }
        let mut attrs = Vec::new();
        let rest = collect_attributes(&chunk, &mut attrs);
        params.push(parse_param(&rest));
    }
    if params.len() == 1 && params[0].name.is_none() && params[0].ty.is_void() {
        params.clear();
    }

    Some(CDeclaration {
        name: name_tok.text.clone(),
        return_type,
        params,
        variadic,
        attributes,
        location: SourceLocation::new(path, name_tok.line, name_tok.column),
    })
}

/// Remove attribute syntax from `tokens`, appending what was found.
fn collect_attributes(tokens: &[Token], out: &mut Vec<Attribute>) -> Vec<Token> {
    let mut rest = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if tok.is("__attribute__") && tokens.get(i + 1).is_some_and(|t| t.is("(")) {
            let end = skip_group(tokens, i + 1, "(", ")");
            // __attribute__ (( a, b(x) ))
            let (lo, hi) = (i + 3, end.saturating_sub(2));
            let inner = if lo <= hi { &tokens[lo..hi] } else { &[][..] };
            for item in split_params(inner) {
                if let Some(first) = item.first() {
                    let args = string_args(&item[1..]);
                    out.push(Attribute {
                        name: first.text.clone(),
                        args,
                        gnu: true,
                        text: format!("__attribute__(({}))", join_tokens(&item)),
                    });
                }
            }
            i = end;
            continue;
        }
        if tok.kind == TokenKind::Ident && tok.text.starts_with("__arm_") {
            let mut end = i + 1;
            let mut args = Vec::new();
            if tokens.get(i + 1).is_some_and(|t| t.is("(")) {
                end = skip_group(tokens, i + 1, "(", ")");
                args = string_args(&tokens[i + 1..end]);
            }
            out.push(Attribute {
                name: tok.text.clone(),
                args,
                gnu: false,
                text: join_tokens(&tokens[i..end]),
            });
            i = end;
            continue;
        }
        rest.push(tok.clone());
        i += 1;
    }
    rest
}

fn string_args(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Str)
        .map(|t| t.text.trim_matches('"').to_string())
        .collect()
}

fn split_params(tokens: &[Token]) -> Vec<Vec<Token>> {
    let mut out = Vec::new();
    let mut cur = Vec::new();
    let mut depth = 0i32;
    for tok in tokens {
        if tok.is("(") || tok.is("[") {
            depth += 1;
        } else if tok.is(")") || tok.is("]") {
            depth -= 1;
        } else if depth == 0 && tok.is(",") {
            out.push(std::mem::take(&mut cur));
            continue;
        }
        cur.push(tok.clone());
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

fn parse_param(tokens: &[Token]) -> CParam {
    // Drop array dimensions, which decay to one pointer level.
    let mut decl = Vec::new();
    let mut array = false;
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].is("[") {
            array = true;
            i = skip_group(tokens, i, "[", "]");
            continue;
        }
        decl.push(tokens[i].clone());
        i += 1;
    }

    if decl.iter().any(|t| t.is("(")) {
        // Function pointer or other complex declarator.
        return CParam {
            name: None,
            ty: TypeName {
                base: join_tokens(&decl),
                pointer: 0,
                spelling: join_tokens(&decl),
            },
        };
    }

    let idents: Vec<&Token> = decl
        .iter()
        .filter(|t| t.kind == TokenKind::Ident && !QUALIFIERS.contains(&t.text.as_str()))
        .collect();
    let name = match idents.last() {
        Some(last) if idents.len() >= 2 && !TYPE_WORDS.contains(&last.text.as_str()) => {
            Some(last.text.clone())
        }
        _ => None,
    };

    let type_tokens: Vec<Token> = match &name {
        Some(n) => {
            let pos = decl.iter().rposition(|t| &t.text == n).unwrap_or(decl.len());
            decl[..pos].to_vec()
        }
        None => decl,
    };
    let mut ty = type_name(&type_tokens);
    if array {
        ty.pointer += 1;
        ty.spelling = format!("{} *", ty.spelling);
    }
    CParam { name, ty }
}

fn type_name(tokens: &[Token]) -> TypeName {
    let words: Vec<&str> = tokens
        .iter()
        .filter(|t| t.kind == TokenKind::Ident && !QUALIFIERS.contains(&t.text.as_str()))
        .map(|t| t.text.as_str())
        .collect();
    let pointer = tokens.iter().filter(|t| t.is("*")).count() as u32;
    TypeName {
        base: words.join(" "),
        pointer,
        spelling: join_tokens(tokens),
    }
}

fn join_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for (i, tok) in tokens.iter().enumerate() {
        let glue = i > 0
            && !(tok.is(")") || tok.is(",") || tok.is("(") && tokens[i - 1].kind == TokenKind::Ident)
            && !tokens[i - 1].is("(");
        if glue {
            out.push(' ');
        }
        out.push_str(&tok.text);
    }
    out
}

/// Replace comments and preprocessor lines with spaces, keeping newlines.
fn blank_comments_and_directives(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut line_start = true;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                out.push(b' ');
                i += 1;
            }
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'*') {
            out.extend_from_slice(b"  ");
            i += 2;
            while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                out.push(if bytes[i] == b'\n' { b'\n' } else { b' ' });
                i += 1;
            }
            if i < bytes.len() {
                out.extend_from_slice(b"  ");
                i += 2;
            }
            continue;
        }
        if line_start && c == b'#' {
            // Directive, including backslash continuations.
            while i < bytes.len() && bytes[i] != b'\n' {
                if bytes[i] == b'\\' && bytes.get(i + 1) == Some(&b'\n') {
                    out.extend_from_slice(b" \n");
                    i += 2;
                    continue;
                }
                out.push(b' ');
                i += 1;
            }
            continue;
        }
        if c == b'"' || c == b'\'' {
            out.push(c);
            i += 1;
            while i < bytes.len() && bytes[i] != c && bytes[i] != b'\n' {
                if bytes[i] == b'\\' && i + 1 < bytes.len() {
                    out.push(bytes[i]);
                    i += 1;
                }
                out.push(bytes[i]);
                i += 1;
            }
            if i < bytes.len() {
                out.push(bytes[i]);
                i += 1;
            }
            line_start = false;
            continue;
        }
        if c == b'\n' {
            line_start = true;
        } else if !c.is_ascii_whitespace() {
            line_start = false;
        }
        out.push(c);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn tokenize(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let (mut line, mut column) = (1u32, 1u32);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let (start_line, start_col) = (line, column);
        let start = i;
        let kind = if c == '\n' {
            line += 1;
            column = 1;
            i += 1;
            continue;
        } else if c.is_whitespace() {
            column += 1;
            i += 1;
            continue;
        } else if c.is_ascii_alphabetic() || c == '_' {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            TokenKind::Ident
        } else if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                i += 1;
            }
            TokenKind::Number
        } else if c == '"' || c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != c && chars[i] != '\n' {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(chars.len());
            TokenKind::Str
        } else if c == '.' && chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') {
            i += 3;
            TokenKind::Ellipsis
        } else {
            i += 1;
            TokenKind::Punct
        };
        column += (i - start) as u32;
        tokens.push(Token {
            kind,
            text: chars[start..i].iter().collect(),
            line: start_line,
            column: start_col,
        });
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> Vec<CDeclaration> {
        scan_declarations(Path::new("unit.c"), text)
    }

    #[test]
    fn test_simple_definitions() {
        let decls = scan(
            "#include <immintrin.h>\n\
             // helper\n\
             void add_const_ps256(const float *in, float *out) {\n  if (1) { }\n}\n\
             __m256 mul(__m256 a, __m256 b) { return a; }\n",
        );
        assert_eq!(decls.len(), 2);
        let add = &decls[0];
        assert_eq!(add.name, "add_const_ps256");
        assert!(add.return_type.is_void());
        assert_eq!(add.params.len(), 2);
        assert_eq!(add.params[0].name.as_deref(), Some("in"));
        assert_eq!(add.params[0].ty.base, "float");
        assert_eq!(add.params[0].ty.pointer, 1);
        assert_eq!(add.params[0].ty.spelling, "const float *");
        assert_eq!((add.location.line, add.location.column), (3, 6));

        let mul = &decls[1];
        assert_eq!(mul.return_type.base, "__m256");
        assert_eq!(mul.params[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_skips_static_inline_and_aggregates() {
        let decls = scan(
            "static inline int helper(int x) { return x; }\n\
             struct pair { int a; int b; };\n\
             static const float table[4] = { 1, 2, 3, 4 };\n\
             int prototype(int x);\n\
             typedef struct { char c; } wrapper;\n\
             int real(void) { return 0; }\n",
        );
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].name, "real");
        assert!(decls[0].params.is_empty());
    }

    #[test]
    fn test_arm_keyword_attributes() {
        let decls = scan(
            "void outer(svfloat32_t a, svbool_t pg) __arm_streaming __arm_inout(\"za\") {\n}\n\
             __arm_locally_streaming void local(float *p) { }\n",
        );
        assert_eq!(decls.len(), 2);
        let outer = &decls[0];
        assert_eq!(outer.attributes.len(), 2);
        assert_eq!(outer.attributes[0].name, "__arm_streaming");
        assert_eq!(outer.attributes[1].name, "__arm_inout");
        assert_eq!(outer.attributes[1].args, vec!["za".to_string()]);
        assert_eq!(outer.attributes[1].text, "__arm_inout(\"za\")");
        assert_eq!(outer.params[0].name.as_deref(), Some("a"));
        assert_eq!(outer.params[0].ty.base, "svfloat32_t");

        let local = &decls[1];
        assert_eq!(local.attributes[0].name, "__arm_locally_streaming");
    }

    #[test]
    fn test_gnu_attributes_and_arrays() {
        let decls = scan(
            "__attribute__((target(\"avx2\"), arm_streaming)) unsigned long sum(const uint8_t data[64], unsigned int n, ...) { return 0; }\n",
        );
        assert_eq!(decls.len(), 1);
        let sum = &decls[0];
        assert_eq!(sum.return_type.base, "unsigned long");
        assert!(sum.variadic);
        let names: Vec<_> = sum.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["target", "arm_streaming"]);
        assert_eq!(sum.attributes[0].args, vec!["avx2".to_string()]);
        assert_eq!(sum.params[0].ty.pointer, 1);
        assert_eq!(sum.params[0].ty.spelling, "const uint8_t *");
        assert_eq!(sum.params[1].name.as_deref(), Some("n"));
        assert_eq!(sum.params[1].ty.base, "unsigned int");
    }

    #[test]
    fn test_comments_keep_positions() {
        let decls = scan("/* a\n b */ int\n/* c */ f(int x) { return x; }\n");
        assert_eq!(decls.len(), 1);
        assert_eq!(decls[0].location.line, 3);
        assert_eq!(decls[0].location.column, 9);
    }
}
