//! A small textual syntax for type expressions and dictionary lookups.
//!
//! Used by the CLI manifest loader and convenient in tests:
//!
//! ```text
//! Foo<T, String>[,]            type expression
//! type List<T>                 dictionary lookups
//! statics Holder<U>
//! thread-statics Holder<U>
//! layout T
//! method Base<T>::Get<U>
//! handle Helpers::Make<T>
//! constrained T IFrob::Frob
//! field Holder<T>::s_value
//! ```
//!
//! Names resolve in order: method parameters, type parameters, primitives,
//! catalog types. `!n` / `!!n` name parameters by index and `__Canon` is the
//! shared marker.

use crate::catalog::Catalog;
use crate::def::{FieldRef, GenericLookup, MethodDef, MethodRef, TypeDef};
use crate::error::CatalogError;
use crate::ty::{Prim, Ty};

/// Generic parameter names in scope while parsing.
#[derive(Default, Debug, Clone)]
pub struct Scope {
    pub type_params: Vec<String>,
    pub method_params: Vec<String>,
}

impl Scope {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn of_type(def: &TypeDef) -> Self {
        Self {
            type_params: def.generic_params.iter().map(|p| p.name.clone()).collect(),
            method_params: Vec::new(),
        }
    }

    pub fn of_method(catalog: &Catalog, def: &MethodDef) -> Self {
        Self {
            type_params: catalog
                .type_def(def.owner)
                .generic_params
                .iter()
                .map(|p| p.name.clone())
                .collect(),
            method_params: def.generic_params.iter().map(|p| p.name.clone()).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Num(u16),
    Lt,
    Gt,
    Comma,
    LBracket,
    RBracket,
    ColonColon,
    Bang,
    BangBang,
}

fn tokenize(input: &str) -> Result<Vec<Token>, CatalogError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '<' => tokens.push(Token::Lt),
            '>' => tokens.push(Token::Gt),
            ',' => tokens.push(Token::Comma),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ':' => {
                if chars.next_if(|(_, c)| *c == ':').is_none() {
                    return Err(CatalogError::syntax(input, "expected `::`"));
                }
                tokens.push(Token::ColonColon);
            }
            '!' => {
                if chars.next_if(|(_, c)| *c == '!').is_some() {
                    tokens.push(Token::BangBang);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            c if c.is_ascii_digit() => {
                let mut end = start + 1;
                while let Some((i, _)) = chars.next_if(|(_, c)| c.is_ascii_digit()) {
                    end = i + 1;
                }
                let n = input[start..end]
                    .parse()
                    .map_err(|_| CatalogError::syntax(input, "parameter index out of range"))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '.' => {
                let mut end = start + c.len_utf8();
                while let Some((i, c)) =
                    chars.next_if(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '.')
                {
                    end = i + c.len_utf8();
                }
                tokens.push(Token::Ident(input[start..end].to_string()));
            }
            other => {
                return Err(CatalogError::syntax(
                    input,
                    format!("unexpected character `{}`", other),
                ))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    catalog: &'a Catalog,
    scope: &'a Scope,
}

impl<'a> Parser<'a> {
    fn new(catalog: &'a Catalog, scope: &'a Scope, input: &'a str) -> Result<Self, CatalogError> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
            catalog,
            scope,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), CatalogError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn error(&self, message: impl Into<String>) -> CatalogError {
        CatalogError::syntax(self.input, message)
    }

    fn finish(&self) -> Result<(), CatalogError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(self.error(format!("unexpected trailing {:?}", t))),
        }
    }

    fn ident(&mut self) -> Result<String, CatalogError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn number(&mut self) -> Result<u16, CatalogError> {
        match self.tokens.get(self.pos).cloned() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            _ => Err(self.error("expected a parameter index")),
        }
    }

    fn type_args(&mut self) -> Result<Vec<Ty>, CatalogError> {
        let mut args = Vec::new();
        if self.eat(&Token::Lt) {
            loop {
                args.push(self.ty()?);
                if self.eat(&Token::Gt) {
                    break;
                }
                self.expect(&Token::Comma, "`,` or `>`")?;
            }
        }
        Ok(args)
    }

    fn ty(&mut self) -> Result<Ty, CatalogError> {
        let mut ty = self.atom()?;
        while self.eat(&Token::LBracket) {
            let mut rank = 1u8;
            while self.eat(&Token::Comma) {
                rank += 1;
            }
            self.expect(&Token::RBracket, "`]`")?;
            ty = Ty::md_array(ty, rank);
        }
        Ok(ty)
    }

    fn atom(&mut self) -> Result<Ty, CatalogError> {
        if self.eat(&Token::BangBang) {
            return Ok(Ty::MethodParam(self.number()?));
        }
        if self.eat(&Token::Bang) {
            return Ok(Ty::Param(self.number()?));
        }
        let name = self.ident()?;
        if name == "__Canon" {
            return Ok(Ty::Canon);
        }
        if let Some(i) = self.scope.method_params.iter().position(|p| *p == name) {
            return Ok(Ty::MethodParam(i as u16));
        }
        if let Some(i) = self.scope.type_params.iter().position(|p| *p == name) {
            return Ok(Ty::Param(i as u16));
        }
        if let Some(prim) = Prim::from_name(&name) {
            return Ok(Ty::Prim(prim));
        }
        let def = self
            .catalog
            .type_by_name(&name)
            .ok_or_else(|| CatalogError::UnknownType(name.clone()))?;
        let args = self.type_args()?;
        let expected = self.catalog.type_def(def).arity();
        if args.len() != expected {
            return Err(CatalogError::ArityMismatch {
                name,
                expected,
                found: args.len(),
            });
        }
        Ok(Ty::Named(def, args))
    }

    /// `Owner<..>::Name<..>`
    fn method_ref(&mut self) -> Result<MethodRef, CatalogError> {
        let owner = self.ty()?;
        self.expect(&Token::ColonColon, "`::`")?;
        let name = self.ident()?;
        let method_args = self.type_args()?;
        let Ty::Named(def, _) = &owner else {
            return Err(self.error("method owner must be a named type"));
        };
        let catalog = self.catalog;
        let method = catalog
            .methods_named(*def, &name)
            .find(|&m| catalog.method(m).arity() == method_args.len())
            .ok_or_else(|| CatalogError::UnknownMethod {
                owner: catalog.type_def(*def).name.clone(),
                name: name.clone(),
            })?;
        Ok(MethodRef::generic(owner, method, method_args))
    }

    /// `Owner<..>::name`
    fn field_ref(&mut self) -> Result<FieldRef, CatalogError> {
        let owner = self.ty()?;
        self.expect(&Token::ColonColon, "`::`")?;
        let name = self.ident()?;
        let Ty::Named(def, _) = &owner else {
            return Err(self.error("field owner must be a named type"));
        };
        if self.catalog.field_index(*def, &name).is_none() {
            return Err(CatalogError::UnknownField {
                owner: self.catalog.type_def(*def).name.clone(),
                name,
            });
        }
        Ok(FieldRef::new(owner, &name))
    }
}

/// Parse a type expression.
pub fn parse_ty(catalog: &Catalog, scope: &Scope, input: &str) -> Result<Ty, CatalogError> {
    let mut parser = Parser::new(catalog, scope, input)?;
    let ty = parser.ty()?;
    parser.finish()?;
    Ok(ty)
}

/// Parse a method reference `Owner<..>::Name<..>`. Overloads resolve to the
/// first declared method with a matching name and generic arity.
pub fn parse_method_ref(
    catalog: &Catalog,
    scope: &Scope,
    input: &str,
) -> Result<MethodRef, CatalogError> {
    let mut parser = Parser::new(catalog, scope, input)?;
    let m = parser.method_ref()?;
    parser.finish()?;
    Ok(m)
}

/// Parse one dictionary lookup: a keyword followed by its operand(s).
pub fn parse_lookup(
    catalog: &Catalog,
    scope: &Scope,
    input: &str,
) -> Result<GenericLookup, CatalogError> {
    let trimmed = input.trim();
    let (keyword, rest) = trimmed
        .split_once(char::is_whitespace)
        .ok_or_else(|| CatalogError::syntax(input, "expected `<kind> <operand>`"))?;
    let mut parser = Parser::new(catalog, scope, rest)?;

    let lookup = match keyword {
        "type" => GenericLookup::Type(parser.ty()?),
        "statics" => GenericLookup::Statics(parser.ty()?),
        "thread-statics" => GenericLookup::ThreadStatics(parser.ty()?),
        "layout" => GenericLookup::Layout(parser.ty()?),
        "method" => GenericLookup::Method(parser.method_ref()?),
        "handle" => GenericLookup::MethodHandle(parser.method_ref()?),
        "constrained" => {
            let constrained = parser.ty()?;
            let method = parser.method_ref()?;
            GenericLookup::Constrained {
                constrained,
                method,
            }
        }
        "field" => GenericLookup::Field(parser.field_ref()?),
        other => {
            return Err(CatalogError::syntax(
                input,
                format!("unknown lookup kind `{}`", other),
            ))
        }
    };
    parser.finish()?;
    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::TypeDef;
    use crate::ty::TypeDefId;

    fn catalog() -> (Catalog, TypeDefId, TypeDefId) {
        let mut cat = Catalog::new();
        let pair = cat.add_type(TypeDef::class("Pair").generics(&["A", "B"]));
        let holder = cat.add_type(
            TypeDef::class("Holder")
                .generics(&["T"])
                .static_field("s_value", Ty::param(0)),
        );
        cat.add_method(holder, MethodDef::new("Get").generics(&["U"]));
        cat.add_method(holder, MethodDef::new("Get"));
        (cat, pair, holder)
    }

    #[test]
    fn parses_nested_generic_arrays() {
        let (cat, pair, _) = catalog();
        let scope = Scope {
            type_params: vec!["T".into()],
            method_params: vec!["U".into()],
        };
        let ty = parse_ty(&cat, &scope, "Pair<T, U[]>[,]").unwrap();
        assert_eq!(
            ty,
            Ty::md_array(
                Ty::named(pair, vec![Ty::param(0), Ty::array(Ty::method_param(0))]),
                2
            )
        );
    }

    #[test]
    fn parses_indexed_params_and_canon() {
        let (cat, pair, _) = catalog();
        let ty = parse_ty(&cat, &Scope::empty(), "Pair<!0, __Canon>").unwrap();
        assert_eq!(ty, Ty::named(pair, vec![Ty::param(0), Ty::Canon]));
        assert_eq!(parse_ty(&cat, &Scope::empty(), "!!1").unwrap(), Ty::method_param(1));
    }

    #[test]
    fn rejects_bad_arity_and_unknown_names() {
        let (cat, ..) = catalog();
        assert_eq!(
            parse_ty(&cat, &Scope::empty(), "Pair<Int32>"),
            Err(CatalogError::ArityMismatch {
                name: "Pair".into(),
                expected: 2,
                found: 1
            })
        );
        assert_eq!(
            parse_ty(&cat, &Scope::empty(), "Missing"),
            Err(CatalogError::UnknownType("Missing".into()))
        );
        assert!(matches!(
            parse_ty(&cat, &Scope::empty(), "Int32 Int32"),
            Err(CatalogError::Syntax { .. })
        ));
    }

    #[test]
    fn parses_lookups() {
        let (cat, _, holder) = catalog();
        let scope = Scope {
            type_params: vec!["T".into()],
            method_params: Vec::new(),
        };

        let statics = parse_lookup(&cat, &scope, "thread-statics Holder<T>").unwrap();
        assert_eq!(
            statics,
            GenericLookup::ThreadStatics(Ty::named(holder, vec![Ty::param(0)]))
        );

        let field = parse_lookup(&cat, &scope, "field Holder<T>::s_value").unwrap();
        assert_eq!(
            field,
            GenericLookup::Field(FieldRef::new(Ty::named(holder, vec![Ty::param(0)]), "s_value"))
        );

        // Overloads resolve by generic arity.
        let generic = parse_lookup(&cat, &scope, "method Holder<T>::Get<String>").unwrap();
        let plain = parse_lookup(&cat, &scope, "handle Holder<T>::Get").unwrap();
        assert_ne!(generic.method(), plain.method());

        let constrained = parse_lookup(&cat, &scope, "constrained T Holder<T>::Get").unwrap();
        assert!(matches!(
            constrained,
            GenericLookup::Constrained { constrained: Ty::Param(0), .. }
        ));
    }

    #[test]
    fn rejects_unknown_members() {
        let (cat, ..) = catalog();
        let scope = Scope::empty();
        assert!(matches!(
            parse_lookup(&cat, &scope, "field Holder<Int32>::nope"),
            Err(CatalogError::UnknownField { .. })
        ));
        assert!(matches!(
            parse_lookup(&cat, &scope, "method Holder<Int32>::Nope"),
            Err(CatalogError::UnknownMethod { .. })
        ));
        assert!(matches!(
            parse_lookup(&cat, &scope, "frob Int32"),
            Err(CatalogError::Syntax { .. })
        ));
    }
}
