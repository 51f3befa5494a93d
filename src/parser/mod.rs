//! Declaration Parser
//!
//! Turns C declaration text into type descriptors. Two entry points:
//!
//! - [`parse_type`] for a single abstract type (`"int *"`, `"int(*)(double)"`)
//! - [`parse_declarations`] for a header fragment, as given to `cdef`
//!
//! Every descriptor produced goes through the [`TypeRegistry`], so the parser
//! itself never creates duplicate structural types.

pub mod expr;
pub mod lexer;

use std::collections::HashMap;

use log::trace;

use crate::ctype::{AggregateKind, CType, Member, Primitive};
use crate::error::{FfiError, Result};
use crate::registry::TypeRegistry;
use lexer::{tokenize, Token, TokenKind};

/// Options applied while parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    /// Cap on member alignment for structs and unions defined by the text
    pub pack: Option<usize>,
}

/// What a named declaration introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Function,
    Variable,
    Typedef,
    /// `#define` or enumerator
    Constant(i64),
}

/// A named entry from a header fragment.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub ty: CType,
    pub kind: DeclarationKind,
}

/// Parse one abstract type.
pub fn parse_type(text: &str, registry: &TypeRegistry) -> Result<CType> {
    parse_type_with(text, registry, ParseOptions::default())
}

pub fn parse_type_with(text: &str, registry: &TypeRegistry, options: ParseOptions) -> Result<CType> {
    let mut parser = Parser::new(tokenize(text, 1)?, registry, options);
    let ty = parser.type_name()?;
    parser.expect_eof()?;
    Ok(ty)
}

/// Parse a header fragment into named declarations.
///
/// Struct, union, enum and typedef definitions are registered as a side
/// effect even when they declare no name.
pub fn parse_declarations(text: &str, registry: &TypeRegistry) -> Result<Vec<Declaration>> {
    parse_declarations_with(text, registry, ParseOptions::default())
}

pub fn parse_declarations_with(
    text: &str,
    registry: &TypeRegistry,
    options: ParseOptions,
) -> Result<Vec<Declaration>> {
    let mut parser = Parser::new(tokenize(text, 1)?, registry, options);
    while !parser.at_eof() {
        parser.external_declaration()?;
    }
    trace!("parsed {} declaration(s)", parser.declarations.len());
    Ok(parser.declarations)
}

const STORAGE_CLASSES: &[&str] = &["typedef", "extern", "static", "inline", "__inline", "__inline__"];

const QUALIFIERS: &[&str] = &[
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "__restrict__",
    "__const",
    "__volatile__",
];

const BASE_KEYWORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "float", "double", "signed", "unsigned", "_Bool",
    "bool",
];

/// Keyword counts collected from a specifier list.
#[derive(Debug, Default)]
struct BaseKeywords {
    void: u8,
    char: u8,
    short: u8,
    int: u8,
    long: u8,
    float: u8,
    double: u8,
    signed: u8,
    unsigned: u8,
    bool: u8,
}

impl BaseKeywords {
    fn any(&self) -> bool {
        self.void
            + self.char
            + self.short
            + self.int
            + self.long
            + self.float
            + self.double
            + self.signed
            + self.unsigned
            + self.bool
            > 0
    }

    fn add(&mut self, keyword: &str) -> std::result::Result<(), &'static str> {
        let slot = match keyword {
            "void" => &mut self.void,
            "char" => &mut self.char,
            "short" => &mut self.short,
            "int" => &mut self.int,
            "long" => &mut self.long,
            "float" => &mut self.float,
            "double" => &mut self.double,
            "signed" => &mut self.signed,
            "unsigned" => &mut self.unsigned,
            _ => &mut self.bool,
        };
        *slot += 1;
        let limit = if keyword == "long" { 2 } else { 1 };
        if *slot > limit {
            return Err("duplicate type keyword");
        }
        Ok(())
    }

    /// `None` is `void`.
    fn resolve(&self) -> std::result::Result<Option<Primitive>, &'static str> {
        const INVALID: &str = "invalid combination of type keywords";
        if self.signed > 0 && self.unsigned > 0 {
            return Err(INVALID);
        }
        let sign = self.signed + self.unsigned;
        let unsigned = self.unsigned > 0;
        let others = |allowed: u8| -> bool {
            self.void + self.char + self.short + self.int + self.long + self.float + self.double + self.bool
                == allowed
        };

        if self.void > 0 {
            return if others(1) && sign == 0 { Ok(None) } else { Err(INVALID) };
        }
        if self.bool > 0 {
            return if others(1) && sign == 0 { Ok(Some(Primitive::Bool)) } else { Err(INVALID) };
        }
        if self.float > 0 {
            return if others(1) && sign == 0 { Ok(Some(Primitive::Float)) } else { Err(INVALID) };
        }
        if self.double > 0 {
            if self.long > 0 {
                return Err("'long double' is unsupported");
            }
            return if others(1) && sign == 0 { Ok(Some(Primitive::Double)) } else { Err(INVALID) };
        }
        if self.char > 0 {
            if !others(1) {
                return Err(INVALID);
            }
            return Ok(Some(match (self.signed > 0, unsigned) {
                (true, _) => Primitive::SChar,
                (_, true) => Primitive::UChar,
                _ => Primitive::Char,
            }));
        }
        if self.short > 0 {
            if self.long > 0 || !others(1 + self.int) {
                return Err(INVALID);
            }
            return Ok(Some(if unsigned { Primitive::UShort } else { Primitive::Short }));
        }
        if self.long > 0 {
            if !others(self.long + self.int) {
                return Err(INVALID);
            }
            return Ok(Some(match (self.long, unsigned) {
                (1, false) => Primitive::Long,
                (1, true) => Primitive::ULong,
                (_, false) => Primitive::LongLong,
                (_, true) => Primitive::ULongLong,
            }));
        }
        Ok(Some(if unsigned { Primitive::UInt } else { Primitive::Int }))
    }
}

struct Specifiers {
    base: CType,
    is_typedef: bool,
}

/// A parsed declarator before it is applied to a base type.
#[derive(Debug, Default)]
struct Declarator {
    pointers: usize,
    name: Option<String>,
    inner: Option<Box<Declarator>>,
    suffixes: Vec<Suffix>,
}

#[derive(Debug)]
enum Suffix {
    Array(Option<usize>),
    Function(Vec<CType>, bool),
}

pub(crate) struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'r TypeRegistry,
    options: ParseOptions,
    /// Enumerators of the enum currently being parsed
    pending_enumerators: HashMap<String, i64>,
    declarations: Vec<Declaration>,
}

impl<'r> Parser<'r> {
    fn new(tokens: Vec<Token>, registry: &'r TypeRegistry, options: ParseOptions) -> Self {
        Self {
            tokens,
            pos: 0,
            registry,
            options,
            pending_enumerators: HashMap::new(),
            declarations: Vec::new(),
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn peek_punct(&self) -> Option<&'static str> {
        match self.peek().kind {
            TokenKind::Punct(p) => Some(p),
            _ => None,
        }
    }

    fn is_punct(&self, punct: &str) -> bool {
        self.peek_punct() == Some(punct)
    }

    fn peek_ident(&self) -> Option<&str> {
        match &self.peek().kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.is_punct(punct) {
            self.advance();
            Ok(())
        } else {
            Err(self.syntax(&format!("expected '{}'", punct)))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(self.syntax("unexpected trailing input"))
        }
    }

    fn syntax(&self, message: &str) -> FfiError {
        self.syntax_at(self.peek(), message)
    }

    fn syntax_at(&self, token: &Token, message: &str) -> FfiError {
        FfiError::Syntax {
            message: message.to_string(),
            fragment: token.fragment(),
            line: token.line,
            column: token.column,
        }
    }

    fn lookup_constant(&self, name: &str) -> Option<i64> {
        self.pending_enumerators
            .get(name)
            .copied()
            .or_else(|| self.registry.constant(name))
    }

    /// Whether `token` can start a specifier list.
    fn starts_type(&self, token: &Token) -> bool {
        match &token.kind {
            TokenKind::Ident(s) => {
                STORAGE_CLASSES.contains(&s.as_str())
                    || QUALIFIERS.contains(&s.as_str())
                    || BASE_KEYWORDS.contains(&s.as_str())
                    || matches!(s.as_str(), "struct" | "union" | "enum")
                    || self.registry.lookup_type_name(s).is_some()
            }
            _ => false,
        }
    }

    // ---- declarations ----

    fn external_declaration(&mut self) -> Result<()> {
        if let TokenKind::Directive(body) = &self.peek().kind {
            let body = body.clone();
            let token = self.advance();
            return self.directive(&body, &token);
        }
        if self.is_punct(";") {
            self.advance();
            return Ok(());
        }

        let specs = self.specifiers()?;
        if self.is_punct(";") {
            self.advance();
            return Ok(());
        }
        loop {
            let declarator = self.declarator()?;
            let (name, ty) = self.apply(&specs.base, declarator)?;
            let name = name.ok_or_else(|| self.syntax("expected identifier"))?;
            if self.is_punct("=") {
                return Err(self.syntax("initializers are not supported"));
            }
            if self.is_punct("{") {
                return Err(self.syntax("function bodies are not supported"));
            }
            let kind = if specs.is_typedef {
                self.registry.define_typedef(&name, &ty)?;
                DeclarationKind::Typedef
            } else if ty.is_function() {
                DeclarationKind::Function
            } else {
                DeclarationKind::Variable
            };
            trace!("declared {:?} {}", kind, ty.declare(&name));
            self.declarations.push(Declaration { name, ty, kind });
            if self.is_punct(",") {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(";")
    }

    fn directive(&mut self, body: &str, token: &Token) -> Result<()> {
        let mut sub = Parser::new(tokenize(body, token.line)?, self.registry, self.options);
        if sub.peek_ident() != Some("define") {
            return Err(self.syntax_at(token, "unsupported preprocessor directive"));
        }
        sub.advance();
        let name = match sub.advance().kind {
            TokenKind::Ident(name) => name,
            _ => return Err(self.syntax_at(token, "expected macro name after #define")),
        };
        if sub.at_eof() {
            return Err(self.syntax_at(token, "#define without an integer value"));
        }
        let value = sub.const_expr()?;
        sub.expect_eof()?;
        self.registry.define_constant(&name, value)?;
        let ty = if i32::try_from(value).is_ok() {
            self.registry.primitive(Primitive::Int)
        } else {
            self.registry.primitive(Primitive::LongLong)
        };
        self.declarations.push(Declaration {
            name,
            ty,
            kind: DeclarationKind::Constant(value),
        });
        Ok(())
    }

    /// Specifiers followed by an abstract declarator.
    pub(super) fn type_name(&mut self) -> Result<CType> {
        let specs = self.specifiers()?;
        if specs.is_typedef {
            return Err(self.syntax("unexpected 'typedef'"));
        }
        let declarator = self.declarator()?;
        let (name, ty) = self.apply(&specs.base, declarator)?;
        if let Some(name) = name {
            return Err(self.syntax(&format!("unexpected identifier '{}' in type name", name)));
        }
        Ok(ty)
    }

    fn specifiers(&mut self) -> Result<Specifiers> {
        let mut is_typedef = false;
        let mut keywords = BaseKeywords::default();
        let mut base: Option<CType> = None;
        let start = self.peek().clone();

        while let Some(ident) = self.peek_ident().map(str::to_string) {
            let word = ident.as_str();
            if STORAGE_CLASSES.contains(&word) {
                is_typedef |= word == "typedef";
                self.advance();
            } else if QUALIFIERS.contains(&word) {
                self.advance();
            } else if BASE_KEYWORDS.contains(&word) {
                if base.is_some() {
                    return Err(self.syntax("invalid combination of type specifiers"));
                }
                keywords.add(word).map_err(|m| self.syntax(m))?;
                self.advance();
            } else if matches!(word, "struct" | "union" | "enum") {
                if base.is_some() || keywords.any() {
                    return Err(self.syntax("invalid combination of type specifiers"));
                }
                self.advance();
                base = Some(match word {
                    "struct" => self.aggregate(AggregateKind::Struct)?,
                    "union" => self.aggregate(AggregateKind::Union)?,
                    _ => self.enumeration()?,
                });
            } else if base.is_none() && !keywords.any() {
                let ty = self
                    .registry
                    .lookup_type_name(word)
                    .ok_or_else(|| FfiError::UnknownType(ident.clone()))?;
                self.advance();
                base = Some(ty);
            } else {
                break;
            }
        }

        let base = match base {
            Some(ty) => ty,
            None if keywords.any() => match keywords.resolve().map_err(|m| self.syntax_at(&start, m))? {
                Some(p) => self.registry.primitive(p),
                None => self.registry.void(),
            },
            None => return Err(self.syntax("expected a type")),
        };
        Ok(Specifiers { base, is_typedef })
    }

    fn aggregate(&mut self, kind: AggregateKind) -> Result<CType> {
        let name = self.peek_ident().map(str::to_string);
        if name.is_some() {
            self.advance();
        }
        if !self.is_punct("{") {
            return match name {
                Some(name) => self.registry.declare_forward(&name, kind),
                None => Err(self.syntax("expected tag name or '{'")),
            };
        }
        self.advance();
        if let Some(name) = &name {
            self.registry.declare_forward(name, kind)?;
        }
        let members = self.members()?;
        self.expect("}")?;
        match name {
            Some(name) => self.registry.define(&name, kind, &members, self.options.pack),
            None => self
                .registry
                .define_anonymous(kind, &members, self.options.pack),
        }
    }

    fn members(&mut self) -> Result<Vec<Member>> {
        let mut members = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.syntax("expected '}'"));
            }
            let specs = self.specifiers()?;
            if specs.is_typedef {
                return Err(self.syntax("typedef inside struct or union"));
            }
            if self.is_punct(";") {
                self.advance();
                members.push(Member::anonymous(&specs.base));
                continue;
            }
            loop {
                if self.is_punct(":") {
                    self.advance();
                    let width = self.bit_width()?;
                    members.push(Member::bits(None, &specs.base, width));
                } else {
                    let declarator = self.declarator()?;
                    let (name, ty) = self.apply(&specs.base, declarator)?;
                    let name = name.ok_or_else(|| self.syntax("expected member name"))?;
                    if self.is_punct(":") {
                        self.advance();
                        let width = self.bit_width()?;
                        members.push(Member::bits(Some(&name), &ty, width));
                    } else {
                        members.push(Member::named(name, &ty));
                    }
                }
                if self.is_punct(",") {
                    self.advance();
                    continue;
                }
                break;
            }
            self.expect(";")?;
        }
        Ok(members)
    }

    fn bit_width(&mut self) -> Result<u32> {
        let token = self.peek().clone();
        let width = self.const_expr()?;
        u32::try_from(width).map_err(|_| self.syntax_at(&token, "negative bit-field width"))
    }

    fn enumeration(&mut self) -> Result<CType> {
        let name = self.peek_ident().map(str::to_string);
        if name.is_some() {
            self.advance();
        }
        if !self.is_punct("{") {
            let name = name.ok_or_else(|| self.syntax("expected tag name or '{'"))?;
            return self
                .registry
                .lookup_tag(&name)
                .filter(|t| t.as_enum().is_some())
                .ok_or(FfiError::UnknownType(format!("enum {}", name)));
        }
        self.advance();

        let mut enumerators = Vec::new();
        let mut next: i64 = 0;
        self.pending_enumerators.clear();
        while !self.is_punct("}") {
            let token = self.advance();
            let ident = match token.kind {
                TokenKind::Ident(ref s) => s.clone(),
                _ => return Err(self.syntax_at(&token, "expected enumerator name")),
            };
            if self.is_punct("=") {
                self.advance();
                next = self.const_expr()?;
            }
            if self.pending_enumerators.insert(ident.clone(), next).is_some() {
                return Err(FfiError::redefinition(ident, "duplicate enumerator"));
            }
            enumerators.push((ident, next));
            next = next.wrapping_add(1);
            if self.is_punct(",") {
                self.advance();
            } else if !self.is_punct("}") {
                return Err(self.syntax("expected ',' or '}'"));
            }
        }
        self.advance();
        self.pending_enumerators.clear();

        let ty = self.registry.define_enum(name.as_deref(), enumerators.clone())?;
        for (ident, value) in enumerators {
            self.declarations.push(Declaration {
                name: ident,
                ty: ty.clone(),
                kind: DeclarationKind::Constant(value),
            });
        }
        Ok(ty)
    }

    // ---- declarators ----

    fn declarator(&mut self) -> Result<Declarator> {
        let mut declarator = Declarator::default();
        while self.is_punct("*") {
            self.advance();
            declarator.pointers += 1;
            while self
                .peek_ident()
                .is_some_and(|s| QUALIFIERS.contains(&s))
            {
                self.advance();
            }
        }

        if let Some(name) = self.peek_ident().map(str::to_string) {
            if !self.starts_type(self.peek()) {
                self.advance();
                declarator.name = Some(name);
            }
        } else if self.is_punct("(") && self.is_grouping_paren() {
            self.advance();
            declarator.inner = Some(Box::new(self.declarator()?));
            self.expect(")")?;
        }

        loop {
            if self.is_punct("[") {
                self.advance();
                let length = if self.is_punct("]") {
                    None
                } else {
                    let token = self.peek().clone();
                    let n = self.const_expr()?;
                    let n = usize::try_from(n)
                        .map_err(|_| self.syntax_at(&token, "negative array length"))?;
                    (n > 0).then_some(n)
                };
                self.expect("]")?;
                declarator.suffixes.push(Suffix::Array(length));
            } else if self.is_punct("(") {
                self.advance();
                let (params, variadic) = self.params()?;
                declarator.suffixes.push(Suffix::Function(params, variadic));
            } else {
                break;
            }
        }
        Ok(declarator)
    }

    /// After a `(` in declarator position: grouping (`(*p)`) or a parameter list.
    fn is_grouping_paren(&self) -> bool {
        let next = self.peek_nth(1);
        match &next.kind {
            TokenKind::Punct("*") | TokenKind::Punct("(") | TokenKind::Punct("[") => true,
            TokenKind::Ident(_) => !self.starts_type(next),
            _ => false,
        }
    }

    fn params(&mut self) -> Result<(Vec<CType>, bool)> {
        let mut params = Vec::new();
        let mut variadic = false;
        if self.is_punct(")") {
            self.advance();
            return Ok((params, variadic));
        }
        if self.peek_ident() == Some("void") && matches!(self.peek_nth(1).kind, TokenKind::Punct(")")) {
            self.advance();
            self.advance();
            return Ok((params, variadic));
        }
        loop {
            if self.is_punct("...") {
                self.advance();
                if params.is_empty() {
                    return Err(self.syntax("'...' requires a named parameter before it"));
                }
                variadic = true;
                self.expect(")")?;
                break;
            }
            let specs = self.specifiers()?;
            let declarator = self.declarator()?;
            let (_, ty) = self.apply(&specs.base, declarator)?;
            let ty = if let Some(item) = ty.item() {
                self.registry.pointer_to(item)
            } else if ty.is_function() {
                self.registry.pointer_to(&ty)
            } else if ty.is_void() {
                return Err(self.syntax("parameter has type 'void'"));
            } else {
                ty
            };
            params.push(ty);
            if self.is_punct(",") {
                self.advance();
                continue;
            }
            self.expect(")")?;
            break;
        }
        Ok((params, variadic))
    }

    /// Apply a declarator to a base type: pointers bind tightest, then suffixes
    /// right to left, then the parenthesized inner declarator.
    fn apply(&self, base: &CType, declarator: Declarator) -> Result<(Option<String>, CType)> {
        let mut ty = base.clone();
        for _ in 0..declarator.pointers {
            ty = self.registry.pointer_to(&ty);
        }
        for suffix in declarator.suffixes.into_iter().rev() {
            ty = match suffix {
                Suffix::Array(length) => {
                    if ty.is_void() || ty.is_function() || ty.is_flexible_array() {
                        return Err(self.syntax(&format!("array of '{}'", ty.c_name())));
                    }
                    self.registry.array_of(&ty, length)
                }
                Suffix::Function(params, variadic) => {
                    if ty.is_array() || ty.is_function() {
                        return Err(self.syntax(&format!("function returning '{}'", ty.c_name())));
                    }
                    self.registry.function(&ty, params, variadic)
                }
            };
        }
        match declarator.inner {
            Some(inner) => self.apply(&ty, *inner),
            None => Ok((declarator.name, ty)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ty(text: &str) -> CType {
        let reg = TypeRegistry::new();
        parse_type(text, &reg).unwrap()
    }

    #[test]
    fn test_primitive_spellings() {
        assert_eq!(ty("signed long int").c_name(), "long");
        assert_eq!(ty("unsigned").c_name(), "unsigned int");
        assert_eq!(ty("long long unsigned").c_name(), "unsigned long long");
        assert_eq!(ty("short int").c_name(), "short");
        assert_eq!(ty("const char * const").c_name(), "char *");
        assert_eq!(ty("uint32_t").c_name(), "uint32_t");
    }

    #[test]
    fn test_declarator_precedence() {
        assert_eq!(ty("int *[3]").c_name(), "int *[3]");
        assert_eq!(ty("int (*)[3]").c_name(), "int(*)[3]");
        assert_eq!(ty("int(*)(double)").c_name(), "int(*)(double)");
        assert_eq!(ty("int[2][3]").item().unwrap().c_name(), "int[3]");
        assert_eq!(ty("char[]").length(), None);
        assert!(ty("char[]").is_flexible_array());
        assert_eq!(ty("int (*(*)(int))(double)").c_name(), "int(*(*)(int))(double)");
    }

    #[test]
    fn test_invalid_keywords() {
        let reg = TypeRegistry::new();
        assert!(matches!(parse_type("long double", &reg), Err(FfiError::Syntax { .. })));
        assert!(matches!(parse_type("signed unsigned", &reg), Err(FfiError::Syntax { .. })));
        assert!(matches!(parse_type("short long", &reg), Err(FfiError::Syntax { .. })));
        assert!(matches!(parse_type("foo_t", &reg), Err(FfiError::UnknownType(n)) if n == "foo_t"));
    }

    #[test]
    fn test_parse_type_deduplicates() {
        let reg = TypeRegistry::new();
        let a = parse_type("int *", &reg).unwrap();
        let b = parse_type("int*", &reg).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_declarations() {
        let reg = TypeRegistry::new();
        let decls = parse_declarations(
            "double sin(double);\n\
             extern int errno_like, *ptr;\n\
             typedef struct point { int x, y; } point_t;\n\
             int printf(const char *fmt, ...);",
            &reg,
        )
        .unwrap();
        let names: Vec<_> = decls.iter().map(|d| (d.name.as_str(), d.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("sin", DeclarationKind::Function),
                ("errno_like", DeclarationKind::Variable),
                ("ptr", DeclarationKind::Variable),
                ("point_t", DeclarationKind::Typedef),
                ("printf", DeclarationKind::Function),
            ]
        );
        assert_eq!(decls[0].ty.c_name(), "double(double)");
        assert_eq!(decls[4].ty.c_name(), "int(char *, ...)");
        let point = reg.lookup_typedef("point_t").unwrap();
        assert_eq!(point, reg.lookup_tag("point").unwrap());
        assert_eq!(point.offset_of("y").unwrap(), Primitive::Int.size());
    }

    #[test]
    fn test_parameter_decay_and_void() {
        let reg = TypeRegistry::new();
        let f = parse_type("int(int[4], int(double), void *)", &reg).unwrap();
        let params: Vec<_> = f
            .as_function()
            .unwrap()
            .params
            .iter()
            .map(|p| p.c_name().to_string())
            .collect();
        assert_eq!(params, vec!["int *", "int(*)(double)", "void *"]);
        assert!(parse_type("int(void)", &reg).unwrap().as_function().unwrap().params.is_empty());
    }

    #[test]
    fn test_enum_and_define() {
        let reg = TypeRegistry::new();
        let decls = parse_declarations(
            "#define BUF_SIZE (1 << 8)\n\
             enum color { RED, GREEN = BUF_SIZE + 1, BLUE };\n\
             char buf[BUF_SIZE];",
            &reg,
        )
        .unwrap();
        assert_eq!(reg.constant("BUF_SIZE"), Some(256));
        assert_eq!(reg.constant("GREEN"), Some(257));
        assert_eq!(reg.constant("BLUE"), Some(258));
        let buf = decls.iter().find(|d| d.name == "buf").unwrap();
        assert_eq!(buf.ty.length(), Some(256));
    }

    #[test]
    fn test_self_referential_struct() {
        let reg = TypeRegistry::new();
        parse_declarations("struct node { int value; struct node *next; };", &reg).unwrap();
        let node = reg.lookup_tag("node").unwrap();
        let next = node.field("next").unwrap();
        assert_eq!(next.ty.pointee(), Some(&node));
    }

    #[test]
    fn test_anonymous_members() {
        let reg = TypeRegistry::new();
        parse_declarations(
            "struct tagged { int kind; union { int i; double d; }; };",
            &reg,
        )
        .unwrap();
        let tagged = reg.lookup_tag("tagged").unwrap();
        assert_eq!(tagged.offset_of("d").unwrap(), 8);
        assert_eq!(tagged.offset_of("i").unwrap(), 8);
    }

    #[test]
    fn test_syntax_error_position() {
        let reg = TypeRegistry::new();
        match parse_declarations("int x;\nint y = 3;", &reg) {
            Err(FfiError::Syntax { line, fragment, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(fragment, "=");
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
        assert!(parse_declarations("#include <stdio.h>\n", &reg).is_err());
    }
}
