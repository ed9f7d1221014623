//! # Function signatures
//!
//! Rebuilds a C/C++ style prototype (`ns::Class::method(int, const char*) const`)
//! from a subprogram entry and the type entries its parameters reference.
//!
//! Parameter types are walked down their `DW_AT_type` chains. Typedef names
//! are kept as written; `const`, `volatile`, pointer, reference and array
//! layers become [`TypeModifier`]s on a [`TypeDescriptor`]. Member-function
//! constness comes from the artificial `this` parameter: a `this` pointing at
//! a `const` class makes the method `const`.
//!
//! Reconstruction only reads the entry tree, so the same entry always yields
//! the same text.

use std::fmt;

use gimli::constants;
use gimli::DwTag;
use tracing::trace;

use crate::error::{DecodeError, Result};
use crate::model::{DebugInfo, DieRef};

/// Upper bound on type-chain and origin hops.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeModifier
{
    Pointer,
    Reference,
    RvalueReference,
    Const,
    Volatile,
    /// Array with an element count, when known.
    Array(Option<u64>),
}

/// A parameter or return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor
{
    /// Base type name (a typedef, class, base type or rendered function type).
    pub name: String,
    /// Layers between the use and the base type, outermost first.
    pub modifiers: Vec<TypeModifier>,
    /// Namespaces and classes enclosing the base type, outermost first.
    pub enclosing_scopes: Vec<String>,
}

impl TypeDescriptor
{
    fn named(name: impl Into<String>) -> Self
    {
        Self {
            name: name.into(),
            modifiers: Vec::new(),
            enclosing_scopes: Vec::new(),
        }
    }

    #[must_use]
    pub fn qualified_name(&self) -> String
    {
        qualify(&self.enclosing_scopes, &self.name)
    }

    /// Whether the type is a pointer or reference to a `const` object.
    #[must_use]
    pub fn points_to_const(&self) -> bool
    {
        self.modifiers
            .iter()
            .position(|modifier| {
                matches!(
                    modifier,
                    TypeModifier::Pointer | TypeModifier::Reference | TypeModifier::RvalueReference
                )
            })
            .is_some_and(|indirection| self.modifiers[indirection + 1..].contains(&TypeModifier::Const))
    }
}

impl fmt::Display for TypeDescriptor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut text = self.qualified_name();
        let mut bare = true;
        for modifier in self.modifiers.iter().rev() {
            match modifier {
                TypeModifier::Const if bare => text = format!("const {text}"),
                TypeModifier::Volatile if bare => text = format!("volatile {text}"),
                TypeModifier::Const => text.push_str(" const"),
                TypeModifier::Volatile => text.push_str(" volatile"),
                TypeModifier::Pointer => text.push('*'),
                TypeModifier::Reference => text.push('&'),
                TypeModifier::RvalueReference => text.push_str("&&"),
                TypeModifier::Array(Some(count)) => text.push_str(&format!("[{count}]")),
                TypeModifier::Array(None) => text.push_str("[]"),
            }
            bare &= matches!(modifier, TypeModifier::Const | TypeModifier::Volatile);
        }
        f.write_str(&text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter
{
    pub name: Option<String>,
    pub ty: TypeDescriptor,
}

/// A reconstructed prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature
{
    pub name: String,
    /// Namespaces and classes enclosing the function, outermost first.
    pub scopes: Vec<String>,
    /// Parameters without the implicit `this`.
    pub parameters: Vec<Parameter>,
    /// `None` for `void`.
    pub return_type: Option<TypeDescriptor>,
    pub is_const: bool,
    pub is_variadic: bool,
}

impl FunctionSignature
{
    #[must_use]
    pub fn qualified_name(&self) -> String
    {
        qualify(&self.scopes, &self.name)
    }

    /// The prototype prefixed by its return type.
    #[must_use]
    pub fn with_return_type(&self) -> String
    {
        match &self.return_type {
            Some(ty) => format!("{ty} {self}"),
            None => format!("void {self}"),
        }
    }
}

impl fmt::Display for FunctionSignature
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut parameters: Vec<String> = self.parameters.iter().map(|p| p.ty.to_string()).collect();
        if self.is_variadic {
            parameters.push("...".to_string());
        }
        write!(f, "{}({})", self.qualified_name(), parameters.join(", "))?;
        if self.is_const {
            f.write_str(" const")?;
        }
        Ok(())
    }
}

fn qualify(scopes: &[String], name: &str) -> String
{
    let mut text = scopes.join("::");
    if !text.is_empty() {
        text.push_str("::");
    }
    text.push_str(name);
    text
}

fn is_scope_tag(tag: DwTag) -> bool
{
    matches!(
        tag,
        constants::DW_TAG_namespace | constants::DW_TAG_class_type | constants::DW_TAG_structure_type | constants::DW_TAG_union_type
    )
}

pub struct SignatureReconstructor<'a>
{
    info: &'a DebugInfo,
}

impl<'a> SignatureReconstructor<'a>
{
    #[must_use]
    pub fn new(info: &'a DebugInfo) -> Self
    {
        Self { info }
    }

    /// Defined functions whose name or qualified name is `name`.
    #[must_use]
    pub fn functions_named(&self, name: &str) -> Vec<DieRef<'a>>
    {
        let mut found = Vec::new();
        for unit in self.info.units() {
            for index in 0..unit.entries().len() {
                let die = DieRef::new(unit, index);
                if die.tag() != constants::DW_TAG_subprogram || die.flag(constants::DW_AT_declaration) {
                    continue;
                }
                let Some(own) = self.chain(die).find_map(|entry| entry.name()) else {
                    continue;
                };
                if own == name || qualify(&self.function_scopes(die), own) == name {
                    found.push(die);
                }
            }
        }
        found
    }

    /// Rebuild the prototype of a subprogram or inlined subroutine.
    pub fn reconstruct(&self, function: DieRef<'a>) -> Result<FunctionSignature>
    {
        let tag = function.tag();
        if tag != constants::DW_TAG_subprogram && tag != constants::DW_TAG_inlined_subroutine {
            return Err(DecodeError::Unsupported(format!(
                "signature of a {tag} entry at offset {:#x}",
                function.offset()
            )));
        }

        let name = self
            .chain(function)
            .find_map(|entry| entry.name())
            .unwrap_or("<anonymous>")
            .to_string();
        let scopes = self.function_scopes(function);

        let return_type = match self.chain(function).find_map(|entry| entry.reference(constants::DW_AT_type)) {
            Some(offset) => Some(self.describe(offset)?),
            None => None,
        };

        // The entry that lists the parameters: concrete definitions may omit
        // them and rely on their declaration.
        let owner = self
            .chain(function)
            .find(|entry| {
                entry.children().any(|child| {
                    child.tag() == constants::DW_TAG_formal_parameter
                        || child.tag() == constants::DW_TAG_unspecified_parameters
                })
            })
            .unwrap_or(function);

        let mut parameters = Vec::new();
        let mut is_const = false;
        let mut is_variadic = false;
        let mut first_parameter = true;
        for child in owner.children() {
            if child.tag() == constants::DW_TAG_unspecified_parameters {
                is_variadic = true;
                continue;
            }
            if child.tag() != constants::DW_TAG_formal_parameter {
                continue;
            }
            let ty = match self.chain(child).find_map(|entry| entry.reference(constants::DW_AT_type)) {
                Some(offset) => self.describe(offset)?,
                None => TypeDescriptor::named("void"),
            };
            // Only an artificial first formal parameter is `this`; template
            // parameters may precede it.
            let is_first = std::mem::replace(&mut first_parameter, false);
            let artificial = self.chain(child).any(|entry| entry.flag(constants::DW_AT_artificial));
            if is_first && artificial {
                is_const = ty.points_to_const();
                continue;
            }
            parameters.push(Parameter {
                name: self.chain(child).find_map(|entry| entry.name()).map(str::to_string),
                ty,
            });
        }

        trace!(function = function.offset(), %name, parameters = parameters.len(), "reconstructed signature");
        Ok(FunctionSignature {
            name,
            scopes,
            parameters,
            return_type,
            is_const,
            is_variadic,
        })
    }

    /// `die` followed by the entries it completes through
    /// `abstract_origin`/`specification`.
    fn chain(&self, die: DieRef<'a>) -> impl Iterator<Item = DieRef<'a>> + 'a
    {
        let info = self.info;
        std::iter::successors(Some(die), move |entry| {
            entry
                .reference(constants::DW_AT_abstract_origin)
                .or_else(|| entry.reference(constants::DW_AT_specification))
                .and_then(|offset| info.entry(offset))
        })
        .take(MAX_DEPTH)
    }

    fn function_scopes(&self, function: DieRef<'a>) -> Vec<String>
    {
        self.chain(function)
            .map(enclosing_scopes)
            .find(|scopes| !scopes.is_empty())
            .unwrap_or_default()
    }

    /// Walk the type chain starting at the type entry at `offset`.
    fn describe(&self, offset: u64) -> Result<TypeDescriptor>
    {
        let mut modifiers = Vec::new();
        let mut next = Some(offset);
        for _ in 0..MAX_DEPTH {
            let Some(offset) = next else {
                return Ok(TypeDescriptor {
                    name: "void".to_string(),
                    modifiers,
                    enclosing_scopes: Vec::new(),
                });
            };
            let die = self.info.entry(offset).ok_or(DecodeError::InvalidReference { offset })?;
            let inner = die.reference(constants::DW_AT_type);
            match die.tag() {
                constants::DW_TAG_const_type => modifiers.push(TypeModifier::Const),
                constants::DW_TAG_volatile_type => modifiers.push(TypeModifier::Volatile),
                constants::DW_TAG_pointer_type => modifiers.push(TypeModifier::Pointer),
                constants::DW_TAG_reference_type => modifiers.push(TypeModifier::Reference),
                constants::DW_TAG_rvalue_reference_type => modifiers.push(TypeModifier::RvalueReference),
                constants::DW_TAG_array_type => {
                    let mut dimensions: Vec<TypeModifier> = die
                        .children()
                        .filter(|child| child.tag() == constants::DW_TAG_subrange_type)
                        .map(|subrange| {
                            TypeModifier::Array(
                                subrange
                                    .udata(constants::DW_AT_count)
                                    .or_else(|| subrange.udata(constants::DW_AT_upper_bound).map(|bound| bound + 1)),
                            )
                        })
                        .collect();
                    if dimensions.is_empty() {
                        dimensions.push(TypeModifier::Array(None));
                    }
                    modifiers.extend(dimensions.into_iter().rev());
                }
                constants::DW_TAG_subroutine_type => {
                    let is_pointer = modifiers.last() == Some(&TypeModifier::Pointer);
                    if is_pointer {
                        modifiers.pop();
                    }
                    return Ok(TypeDescriptor {
                        name: self.function_type_name(die, is_pointer)?,
                        modifiers,
                        enclosing_scopes: Vec::new(),
                    });
                }
                constants::DW_TAG_ptr_to_member_type => {
                    let member = match inner {
                        Some(member) => self.describe(member)?.to_string(),
                        None => "void".to_string(),
                    };
                    let class = match die.reference(constants::DW_AT_containing_type) {
                        Some(class) => self.describe(class)?.to_string(),
                        None => "<unknown>".to_string(),
                    };
                    return Ok(TypeDescriptor {
                        name: format!("{member} {class}::*"),
                        modifiers,
                        enclosing_scopes: Vec::new(),
                    });
                }
                // typedef, base, class, struct, union, enum and anything else
                // with a name ends the walk.
                _ => {
                    return Ok(TypeDescriptor {
                        name: die.name().unwrap_or("<anonymous>").to_string(),
                        modifiers,
                        enclosing_scopes: enclosing_scopes(die),
                    });
                }
            }
            next = inner;
        }
        Err(DecodeError::malformed(offset, "type chain does not terminate"))
    }

    fn function_type_name(&self, die: DieRef<'a>, is_pointer: bool) -> Result<String>
    {
        let return_type = match die.reference(constants::DW_AT_type) {
            Some(offset) => self.describe(offset)?.to_string(),
            None => "void".to_string(),
        };
        let mut parameters = Vec::new();
        for child in die.children() {
            if child.tag() == constants::DW_TAG_unspecified_parameters {
                parameters.push("...".to_string());
            } else if child.tag() == constants::DW_TAG_formal_parameter {
                parameters.push(match child.reference(constants::DW_AT_type) {
                    Some(offset) => self.describe(offset)?.to_string(),
                    None => "void".to_string(),
                });
            }
        }
        let declarator = if is_pointer { " (*)" } else { " " };
        Ok(format!("{return_type}{declarator}({})", parameters.join(", ")))
    }
}

/// Names of the namespaces and classes around `die`, outermost first.
fn enclosing_scopes(die: DieRef<'_>) -> Vec<String>
{
    let mut scopes = Vec::new();
    let mut current = die.parent();
    while let Some(parent) = current {
        if !is_scope_tag(parent.tag()) {
            break;
        }
        let name = match (parent.name(), parent.tag()) {
            (Some(name), _) => name.to_string(),
            (None, constants::DW_TAG_namespace) => "(anonymous namespace)".to_string(),
            (None, _) => "<anonymous>".to_string(),
        };
        scopes.push(name);
        current = parent.parent();
    }
    scopes.reverse();
    scopes
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::model::{AttrValue, Attribute, Sections, UnitBuilder};
    use crate::types::Architecture;

    fn name(text: &str) -> Attribute
    {
        Attribute::new(DW_AT_name, AttrValue::from(text))
    }

    fn of_type(offset: u64) -> Attribute
    {
        Attribute::new(DW_AT_type, AttrValue::Ref(offset))
    }

    /// `class Foo { void bar(int, const char*) const; };` plus an
    /// out-of-line definition that only names its declaration.
    fn foo_bar() -> (DebugInfo, u64)
    {
        let mut b = UnitBuilder::new(4, 8);
        b.open(DW_TAG_compile_unit, [name("foo.cc")]);
        let int = b.leaf(DW_TAG_base_type, [name("int")]);
        let char_ = b.leaf(DW_TAG_base_type, [name("char")]);
        let const_char = b.leaf(DW_TAG_const_type, [of_type(char_)]);
        let const_char_ptr = b.leaf(DW_TAG_pointer_type, [of_type(const_char)]);
        let foo = b.open(DW_TAG_class_type, [name("Foo")]);
        let const_foo = b.leaf(DW_TAG_const_type, [of_type(foo)]);
        let this_type = b.leaf(DW_TAG_pointer_type, [of_type(const_foo)]);
        let decl = b.open(
            DW_TAG_subprogram,
            [name("bar"), Attribute::new(DW_AT_declaration, AttrValue::Flag(true))],
        );
        b.leaf(
            DW_TAG_formal_parameter,
            [of_type(this_type), Attribute::new(DW_AT_artificial, AttrValue::Flag(true))],
        );
        b.leaf(DW_TAG_formal_parameter, [of_type(int)]);
        b.leaf(DW_TAG_formal_parameter, [of_type(const_char_ptr)]);
        b.close();
        b.close();
        let definition = b.leaf(
            DW_TAG_subprogram,
            [
                Attribute::new(DW_AT_specification, AttrValue::Ref(decl)),
                Attribute::new(DW_AT_low_pc, AttrValue::Address(0x1000)),
                Attribute::new(DW_AT_high_pc, AttrValue::Udata(0x40)),
            ],
        );
        let info = DebugInfo::new(Architecture::X86_64, Sections::default(), vec![b.finish()]);
        (info, definition)
    }

    #[test]
    fn test_const_member_function()
    {
        let (info, definition) = foo_bar();
        let reconstructor = SignatureReconstructor::new(&info);
        let function = info.entry(definition).unwrap();
        let signature = reconstructor.reconstruct(function).unwrap();
        assert_eq!(signature.to_string(), "Foo::bar(int, const char*) const");
        assert_eq!(signature.with_return_type(), "void Foo::bar(int, const char*) const");
        assert_eq!(reconstructor.reconstruct(function).unwrap(), signature);
    }

    #[test]
    fn test_template_parameter_before_this()
    {
        let mut b = UnitBuilder::new(4, 8);
        b.open(DW_TAG_compile_unit, [name("foo.cc")]);
        let int = b.leaf(DW_TAG_base_type, [name("int")]);
        let foo = b.open(DW_TAG_class_type, [name("Foo")]);
        let const_foo = b.leaf(DW_TAG_const_type, [of_type(foo)]);
        let this_type = b.leaf(DW_TAG_pointer_type, [of_type(const_foo)]);
        let bar = b.open(DW_TAG_subprogram, [name("bar")]);
        b.leaf(DW_TAG_template_type_parameter, [name("T"), of_type(int)]);
        b.leaf(
            DW_TAG_formal_parameter,
            [of_type(this_type), Attribute::new(DW_AT_artificial, AttrValue::Flag(true))],
        );
        b.leaf(DW_TAG_formal_parameter, [of_type(int)]);
        let info = DebugInfo::new(Architecture::X86_64, Sections::default(), vec![b.finish()]);

        let signature = SignatureReconstructor::new(&info)
            .reconstruct(info.entry(bar).unwrap())
            .unwrap();
        assert!(signature.is_const);
        assert_eq!(signature.parameters.len(), 1);
        assert_eq!(signature.to_string(), "Foo::bar(int) const");
    }

    #[test]
    fn test_functions_named_skips_declarations()
    {
        let (info, definition) = foo_bar();
        let reconstructor = SignatureReconstructor::new(&info);
        let found: Vec<u64> = reconstructor.functions_named("Foo::bar").iter().map(DieRef::offset).collect();
        assert_eq!(found, [definition]);
        assert_eq!(reconstructor.functions_named("bar").len(), 1);
        assert!(reconstructor.functions_named("baz").is_empty());
    }

    #[test]
    fn test_function_pointer_and_member_pointer()
    {
        let mut b = UnitBuilder::new(4, 8);
        b.open(DW_TAG_compile_unit, [name("cb.c")]);
        let int = b.leaf(DW_TAG_base_type, [name("int")]);
        let callback = b.open(DW_TAG_subroutine_type, [of_type(int)]);
        b.leaf(DW_TAG_formal_parameter, [of_type(int)]);
        b.leaf(DW_TAG_unspecified_parameters, Vec::<Attribute>::new());
        b.close();
        let callback_ptr = b.leaf(DW_TAG_pointer_type, [of_type(callback)]);
        let widget = b.leaf(DW_TAG_structure_type, [name("Widget")]);
        let member = b.leaf(
            DW_TAG_ptr_to_member_type,
            [of_type(int), Attribute::new(DW_AT_containing_type, AttrValue::Ref(widget))],
        );
        let size_t = b.leaf(DW_TAG_typedef, [name("size_t"), of_type(int)]);
        let array = b.open(DW_TAG_array_type, [of_type(int)]);
        b.leaf(DW_TAG_subrange_type, [Attribute::new(DW_AT_upper_bound, AttrValue::Udata(3))]);
        b.close();
        let f = b.open(DW_TAG_subprogram, [name("register_cb"), of_type(size_t)]);
        b.leaf(DW_TAG_formal_parameter, [of_type(callback_ptr)]);
        b.leaf(DW_TAG_formal_parameter, [of_type(member)]);
        b.leaf(DW_TAG_formal_parameter, [of_type(array)]);
        let info = DebugInfo::new(Architecture::X86_64, Sections::default(), vec![b.finish()]);

        let signature = SignatureReconstructor::new(&info)
            .reconstruct(info.entry(f).unwrap())
            .unwrap();
        assert_eq!(
            signature.with_return_type(),
            "size_t register_cb(int (*)(int, ...), int Widget::*, int[4])"
        );
        assert!(!signature.is_const);
    }
}
