//! Rust emitter
//!
//! Renders one module per class or enum. A class module holds:
//! - `definition()`, rebuilding the class definition for `Library::builder()`
//! - one enum per union attribute
//! - a `Copy` handle over an [`InstanceId`](crate::runtime::InstanceId) with
//!   typed getters, checked setters, add operations and reference accessors
//! - custom regions that survive regeneration
//!
//! Output is plain text; formatting is left to the caller's tooling.

use std::collections::BTreeSet;

use crate::graph::import_closure;
use crate::schema::{AttributeDefinition, ClassDefinition, EnumDefinition, SpecificationSet, TypeRef};

use super::custom::region;
use super::names::{to_pascal_case, to_snake_case};

/// What the emitter may look at besides the class itself
#[derive(Debug, Clone, Copy)]
pub struct EmitContext<'a> {
    pub set: &'a SpecificationSet,
    /// File name of the diagram, recorded in headers
    pub source: Option<&'a str>,
}

impl<'a> EmitContext<'a> {
    pub fn new(set: &'a SpecificationSet) -> Self {
        Self { set, source: None }
    }

    pub fn with_source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }
}

/// Rust type name of a class or enum
pub fn type_name(name: &str) -> String {
    to_pascal_case(name)
}

/// Module (and file stem) of a class or enum
pub fn module_name(name: &str) -> String {
    to_snake_case(name)
}

/// Enum generated for a union attribute
pub fn union_name(class: &str, attribute: &str) -> String {
    format!("{}{}", type_name(class), to_pascal_case(attribute))
}

// =============================================================================
// Type expressions
// =============================================================================

fn type_ref_rust(type_ref: &TypeRef) -> String {
    match type_ref {
        TypeRef::Primitive(kind) => kind.rust_type().to_string(),
        TypeRef::Named(name) => type_name(name),
    }
}

/// Class in the parent chain of `class` that declares `attribute`
fn declaring_class<'a>(set: &'a SpecificationSet, class: &'a str, attribute: &str) -> &'a str {
    let mut current = set.class(class);
    for _ in 0..=set.classes().count() {
        let Some(definition) = current else {
            break;
        };
        if definition.get_attribute(attribute).is_some() {
            return &definition.name;
        }
        current = definition.parent.as_deref().and_then(|p| set.class(p));
    }
    class
}

fn base_type(owner: &str, attribute: &AttributeDefinition) -> String {
    match attribute.types.as_slice() {
        [single] => type_ref_rust(single),
        _ => union_name(owner, &attribute.name),
    }
}

fn wrap(base: String, attribute: &AttributeDefinition) -> String {
    if attribute.multiple {
        format!("Vec<{base}>")
    } else if attribute.required {
        base
    } else {
        format!("Option<{base}>")
    }
}

/// Getter return type and setter argument type of an attribute
pub fn type_expression(set: &SpecificationSet, class: &str, attribute: &AttributeDefinition) -> String {
    let owner = declaring_class(set, class, &attribute.name);
    wrap(base_type(owner, attribute), attribute)
}

/// Type of the value a reference accessor yields
fn resolved_type(set: &SpecificationSet, attribute: &AttributeDefinition) -> String {
    let base = attribute
        .reference
        .as_ref()
        .and_then(|target| {
            let owner = declaring_class(set, &target.class, &target.attribute);
            set.class(owner)
                .and_then(|c| c.get_attribute(&target.attribute))
                .map(|a| base_type(owner, a))
        })
        .unwrap_or_else(|| "Value".to_string());
    wrap(base, attribute)
}

fn method_name(attribute: &str) -> String {
    match to_snake_case(attribute) {
        name if name == "new" => "new_".to_string(),
        name => name,
    }
}

fn param_name(attribute: &str) -> String {
    match to_snake_case(attribute) {
        name if name == "arena" => "arena_value".to_string(),
        name => name,
    }
}

/// Constructor parameters: every effective attribute, required first
fn constructor_params<'a>(set: &'a SpecificationSet, class: &str) -> Vec<&'a AttributeDefinition> {
    let attributes = set.effective_attributes(class);
    let (mut required, optional): (Vec<_>, Vec<_>) = attributes
        .into_iter()
        .partition(|a| a.required && !a.multiple);
    required.extend(optional);
    required
}

/// Candidates of a multiple attribute that get an add operation
fn add_candidates<'a>(set: &SpecificationSet, attribute: &'a AttributeDefinition) -> Vec<&'a str> {
    if !attribute.multiple || attribute.reference.is_some() {
        return Vec::new();
    }
    attribute
        .named_types()
        .filter(|name| set.class(name).is_some())
        .collect()
}

/// Names of the add operations generated for an attribute
pub fn add_operation_names(set: &SpecificationSet, attribute: &AttributeDefinition) -> Vec<String> {
    let candidates = add_candidates(set, attribute);
    let attr = to_snake_case(&attribute.name);
    match candidates.as_slice() {
        [_] => vec![format!("add_to_{attr}")],
        _ => candidates
            .iter()
            .map(|c| format!("add_{}_to_{attr}", to_snake_case(c)))
            .collect(),
    }
}

fn string_literal(text: &str) -> String {
    format!("{text:?}")
}

fn doc_lines(output: &mut String, prefix: &str, text: &str) {
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            output.push_str(&format!("{prefix}\n"));
        } else {
            output.push_str(&format!("{prefix} {line}\n"));
        }
    }
}

// =============================================================================
// Imports
// =============================================================================

/// `use` lines of one generated module
struct Imports<'a> {
    set: &'a SpecificationSet,
    current: &'a str,
    lines: BTreeSet<String>,
}

impl<'a> Imports<'a> {
    fn new(set: &'a SpecificationSet, current: &'a str) -> Self {
        Self {
            set,
            current,
            lines: BTreeSet::new(),
        }
    }

    fn named(&mut self, name: &str) {
        if name != self.current {
            self.lines
                .insert(format!("use super::{}::{};", module_name(name), type_name(name)));
        }
    }

    fn type_ref(&mut self, type_ref: &TypeRef) {
        match type_ref {
            TypeRef::Primitive(kind) => {
                self.lines.extend(kind.imports().iter().map(|s| s.to_string()));
            }
            TypeRef::Named(name) => self.named(name),
        }
    }

    /// Everything the type expression of `attribute` mentions, seen from `class`
    fn attribute(&mut self, class: &str, attribute: &AttributeDefinition) {
        if attribute.is_union() {
            let owner = declaring_class(self.set, class, &attribute.name);
            if owner != self.current {
                self.lines.insert(format!(
                    "use super::{}::{};",
                    module_name(owner),
                    union_name(owner, &attribute.name)
                ));
            }
        } else if let Some(single) = attribute.types.first() {
            self.type_ref(single);
        }
    }

    fn render(self, output: &mut String) {
        for line in self.lines {
            output.push_str(&line);
            output.push('\n');
        }
    }
}

// =============================================================================
// Class Emission
// =============================================================================

/// Render the module of one class
pub fn emit_class(class: &ClassDefinition, ctx: &EmitContext) -> String {
    let set = ctx.set;
    let name = type_name(&class.name);
    let effective = set.effective_attributes(&class.name);
    let mut output = String::new();

    // Header
    output.push_str(&format!("//! {}\n", class.name));
    if let Some(docstring) = &class.docstring {
        output.push_str("//!\n");
        doc_lines(&mut output, "//!", docstring);
    }
    output.push_str("//!\n");
    match ctx.source {
        Some(source) => output.push_str(&format!("//! Generated by modelkit from `{source}`.\n")),
        None => output.push_str("//! Generated by modelkit.\n"),
    }
    output.push_str("//! Code outside custom regions is replaced on regeneration.\n");
    if let Some(repository) = &class.external {
        output.push_str(&format!("//! External object from {repository}\n"));
    }
    let closure = import_closure(set, &class.name);
    if !closure.is_empty() {
        output.push_str(&format!("//! Depends on: {}\n", closure.join(", ")));
    }
    output.push('\n');

    // Imports
    output.push_str("use modelkit::runtime::{Arena, FromValue, InstanceId, Value};\n");
    if class.attributes.is_empty() {
        output.push_str("use modelkit::schema::ClassDefinition;\n");
    } else {
        output.push_str("use modelkit::schema::{AttributeDefinition, ClassDefinition, TypeRef};\n");
    }
    output.push_str("use modelkit::Result;\n");

    let mut imports = Imports::new(set, &class.name);
    if let Some(parent) = &class.parent {
        imports.named(parent);
    }
    for attribute in &class.attributes {
        for type_ref in &attribute.types {
            imports.type_ref(type_ref);
        }
    }
    for attribute in &effective {
        imports.attribute(&class.name, attribute);
        for target in add_candidates(set, attribute) {
            imports.named(target);
            for param in constructor_params(set, target) {
                imports.attribute(target, param);
            }
        }
        if let Some(reference) = &attribute.reference {
            let owner = declaring_class(set, &reference.class, &reference.attribute);
            if let Some(target) = set.class(owner).and_then(|c| c.get_attribute(&reference.attribute)) {
                imports.attribute(owner, target);
            }
        }
    }
    imports.render(&mut output);
    output.push('\n');
    output.push_str(&region("imports", ""));
    output.push('\n');

    emit_definition(&mut output, class);

    for attribute in class.attributes.iter().filter(|a| a.is_union()) {
        emit_union(&mut output, class, attribute);
    }

    // Handle
    match &class.docstring {
        Some(docstring) => doc_lines(&mut output, "///", docstring),
        None => output.push_str(&format!("/// Handle to a `{}` in an arena\n", class.name)),
    }
    output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]\n");
    output.push_str(&format!("pub struct {name}(pub InstanceId);\n\n"));
    output.push_str(&format!("impl {name} {{\n"));
    output.push_str(&format!(
        "    pub const CLASS: &'static str = {};\n\n",
        string_literal(&class.name)
    ));

    emit_constructor(&mut output, ctx, &class.name);

    for attribute in &effective {
        emit_accessors(&mut output, ctx, &class.name, attribute);
    }
    for attribute in &effective {
        emit_add_operations(&mut output, ctx, attribute);
    }
    for attribute in effective.iter().filter(|a| a.reference.is_some()) {
        emit_resolver(&mut output, ctx, attribute);
    }

    output.push_str(&region("methods", "    "));
    output.push_str("}\n\n");

    // Conversions
    output.push_str(&format!("impl FromValue for {name} {{\n"));
    output.push_str("    fn from_value(value: &Value) -> Option<Self> {\n");
    output.push_str("        value.as_object().map(Self)\n");
    output.push_str("    }\n");
    output.push_str("}\n\n");

    output.push_str(&format!("impl From<{name}> for Value {{\n"));
    output.push_str(&format!("    fn from(value: {name}) -> Self {{\n"));
    output.push_str("        Value::Object(value.0)\n");
    output.push_str("    }\n");
    output.push_str("}\n");

    if let Some(parent) = &class.parent {
        let parent = type_name(parent);
        output.push('\n');
        output.push_str(&format!("impl From<{name}> for {parent} {{\n"));
        output.push_str(&format!("    fn from(value: {name}) -> Self {{\n"));
        output.push_str(&format!("        {parent}(value.0)\n"));
        output.push_str("    }\n");
        output.push_str("}\n");
    }

    output
}

fn emit_definition(output: &mut String, class: &ClassDefinition) {
    output.push_str(&format!("/// Definition of `{}` as registered in a library\n", class.name));
    output.push_str("pub fn definition() -> ClassDefinition {\n");
    output.push_str(&format!("    ClassDefinition::new({})\n", string_literal(&class.name)));
    if let Some(docstring) = &class.docstring {
        output.push_str(&format!("        .with_docstring({})\n", string_literal(docstring)));
    }
    if let Some(parent) = &class.parent {
        output.push_str(&format!("        .with_parent({})\n", string_literal(parent)));
    }
    if let Some(external) = &class.external {
        output.push_str(&format!("        .with_external({})\n", string_literal(external)));
    }
    for attribute in &class.attributes {
        output.push_str(&format!("        .attribute({})\n", attribute_builder(attribute)));
    }
    output.push_str("}\n\n");
}

fn attribute_builder(attribute: &AttributeDefinition) -> String {
    let types: Vec<String> = attribute
        .types
        .iter()
        .map(|t| format!("TypeRef::parse({})", string_literal(t.name())))
        .collect();
    let mut builder = format!(
        "AttributeDefinition::new({}, [{}])",
        string_literal(&attribute.name),
        types.join(", ")
    );
    if attribute.required {
        builder.push_str(".required()");
    }
    if attribute.multiple {
        builder.push_str(".multiple()");
    }
    if let Some(default) = &attribute.default {
        builder.push_str(&format!(".with_default({})", string_literal(default)));
    }
    if let Some(factory) = &attribute.default_factory {
        builder.push_str(&format!(".with_default_factory({})", string_literal(factory)));
    }
    if let Some(reference) = &attribute.reference {
        builder.push_str(&format!(
            ".with_reference({}, {})",
            string_literal(&reference.class),
            string_literal(&reference.attribute)
        ));
    }
    for (key, value) in &attribute.options {
        builder.push_str(&format!(".with_option({}, {})", string_literal(key), string_literal(value)));
    }
    if let Some(description) = &attribute.description {
        builder.push_str(&format!(".with_description({})", string_literal(description)));
    }
    builder
}

fn emit_union(output: &mut String, class: &ClassDefinition, attribute: &AttributeDefinition) {
    let name = union_name(&class.name, &attribute.name);
    let variants: Vec<(String, String)> = attribute
        .types
        .iter()
        .map(|t| {
            let variant = match t {
                TypeRef::Primitive(kind) => kind.variant_name().to_string(),
                TypeRef::Named(n) => type_name(n),
            };
            (variant, type_ref_rust(t))
        })
        .collect();

    output.push_str(&format!("/// Candidate types of `{}.{}`\n", class.name, attribute.name));
    output.push_str("#[derive(Debug, Clone, PartialEq)]\n");
    output.push_str(&format!("pub enum {name} {{\n"));
    for (variant, ty) in &variants {
        output.push_str(&format!("    {variant}({ty}),\n"));
    }
    output.push_str("}\n\n");

    // Candidates are tried in declaration order
    output.push_str(&format!("impl FromValue for {name} {{\n"));
    output.push_str("    fn from_value(value: &Value) -> Option<Self> {\n");
    for (variant, ty) in &variants {
        output.push_str(&format!(
            "        if let Some(v) = <{ty} as FromValue>::from_value(value) {{\n"
        ));
        output.push_str(&format!("            return Some(Self::{variant}(v));\n"));
        output.push_str("        }\n");
    }
    output.push_str("        None\n");
    output.push_str("    }\n");
    output.push_str("}\n\n");

    output.push_str(&format!("impl From<{name}> for Value {{\n"));
    output.push_str(&format!("    fn from(value: {name}) -> Self {{\n"));
    output.push_str("        match value {\n");
    for (variant, _) in &variants {
        output.push_str(&format!("            {name}::{variant}(v) => Value::from(v),\n"));
    }
    output.push_str("        }\n");
    output.push_str("    }\n");
    output.push_str("}\n\n");
}

fn emit_constructor(output: &mut String, ctx: &EmitContext, class: &str) {
    let params = constructor_params(ctx.set, class);
    let signature: Vec<String> = params
        .iter()
        .map(|a| format!("{}: {}", param_name(&a.name), type_expression(ctx.set, class, a)))
        .collect();

    output.push_str(&format!("    /// Create a `{class}` in the arena\n"));
    if signature.is_empty() {
        output.push_str("    pub fn new(arena: &mut Arena) -> Result<Self> {\n");
        output.push_str("        let id = arena.create(Self::CLASS, std::iter::empty::<(&str, Value)>())?;\n");
    } else {
        output.push_str(&format!(
            "    pub fn new(arena: &mut Arena, {}) -> Result<Self> {{\n",
            signature.join(", ")
        ));
        output.push_str("        let id = arena.create(\n");
        output.push_str("            Self::CLASS,\n");
        output.push_str("            [\n");
        for attribute in &params {
            output.push_str(&format!(
                "                ({}, Value::from({})),\n",
                string_literal(&attribute.name),
                param_name(&attribute.name)
            ));
        }
        output.push_str("            ],\n");
        output.push_str("        )?;\n");
    }
    output.push_str("        Ok(Self(id))\n");
    output.push_str("    }\n\n");
}

fn emit_accessors(output: &mut String, ctx: &EmitContext, class: &str, attribute: &AttributeDefinition) {
    let ty = type_expression(ctx.set, class, attribute);
    let method = method_name(&attribute.name);
    let literal = string_literal(&attribute.name);

    if let Some(description) = &attribute.description {
        doc_lines(output, "    ///", description);
    }
    output.push_str(&format!("    pub fn {method}(&self, arena: &Arena) -> Result<{ty}> {{\n"));
    output.push_str(&format!("        arena.field(self.0, {literal})\n"));
    output.push_str("    }\n\n");

    output.push_str(&format!("    pub fn set_{}(&self, arena: &mut Arena, value: {ty}) -> Result<()> {{\n", to_snake_case(&attribute.name)));
    output.push_str(&format!("        arena.set(self.0, {literal}, value)\n"));
    output.push_str("    }\n\n");
}

fn emit_add_operations(output: &mut String, ctx: &EmitContext, attribute: &AttributeDefinition) {
    let candidates = add_candidates(ctx.set, attribute);
    let names = add_operation_names(ctx.set, attribute);
    for (target, method) in candidates.into_iter().zip(names) {
        let params = constructor_params(ctx.set, target);
        let target_type = type_name(target);
        let mut signature = String::from("&self, arena: &mut Arena");
        for param in &params {
            signature.push_str(&format!(
                ", {}: {}",
                param_name(&param.name),
                type_expression(ctx.set, target, param)
            ));
        }
        let arguments: Vec<String> = std::iter::once("arena".to_string())
            .chain(params.iter().map(|p| param_name(&p.name)))
            .collect();

        output.push_str(&format!(
            "    /// Create a `{target}` and append it to `{}`\n",
            attribute.name
        ));
        output.push_str(&format!("    pub fn {method}({signature}) -> Result<{target_type}> {{\n"));
        output.push_str(&format!("        let item = {target_type}::new({})?;\n", arguments.join(", ")));
        output.push_str(&format!(
            "        arena.append(self.0, {}, item)?;\n",
            string_literal(&attribute.name)
        ));
        output.push_str("        Ok(item)\n");
        output.push_str("    }\n\n");
    }
}

fn emit_resolver(output: &mut String, ctx: &EmitContext, attribute: &AttributeDefinition) {
    let Some(reference) = &attribute.reference else {
        return;
    };
    output.push_str(&format!(
        "    /// Value of `{}` behind `{}`\n",
        reference, attribute.name
    ));
    output.push_str(&format!(
        "    pub fn resolve_{}(&self, arena: &Arena) -> Result<{}> {{\n",
        to_snake_case(&attribute.name),
        resolved_type(ctx.set, attribute)
    ));
    output.push_str(&format!(
        "        arena.resolved(self.0, {})\n",
        string_literal(&attribute.name)
    ));
    output.push_str("    }\n\n");
}

// =============================================================================
// Enum Emission
// =============================================================================

/// Render the module of one enumeration
pub fn emit_enum(enumeration: &EnumDefinition, ctx: &EmitContext) -> String {
    let name = type_name(&enumeration.name);
    let members: Vec<(String, &str, &str)> = enumeration
        .members
        .iter()
        .map(|(member, literal)| (to_pascal_case(member), member.as_str(), literal.as_str()))
        .collect();
    let mut output = String::new();

    output.push_str(&format!("//! {}\n", enumeration.name));
    output.push_str("//!\n");
    match ctx.source {
        Some(source) => output.push_str(&format!("//! Generated by modelkit from `{source}`.\n")),
        None => output.push_str("//! Generated by modelkit.\n"),
    }
    output.push('\n');
    output.push_str("use modelkit::runtime::{FromValue, Value};\n");
    output.push_str("use modelkit::schema::EnumDefinition;\n\n");
    output.push_str(&region("imports", ""));
    output.push('\n');

    output.push_str(&format!("/// Definition of `{}` as registered in a library\n", enumeration.name));
    output.push_str("pub fn definition() -> EnumDefinition {\n");
    output.push_str(&format!("    EnumDefinition::new({})\n", string_literal(&enumeration.name)));
    if let Some(docstring) = &enumeration.docstring {
        output.push_str(&format!("        .with_docstring({})\n", string_literal(docstring)));
    }
    for (_, member, literal) in &members {
        output.push_str(&format!(
            "        .member({}, {})\n",
            string_literal(member),
            string_literal(literal)
        ));
    }
    output.push_str("}\n\n");

    match &enumeration.docstring {
        Some(docstring) => doc_lines(&mut output, "///", docstring),
        None => output.push_str(&format!("/// Members of `{}`\n", enumeration.name)),
    }
    output.push_str("#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]\n");
    output.push_str(&format!("pub enum {name} {{\n"));
    for (variant, _, _) in &members {
        output.push_str(&format!("    {variant},\n"));
    }
    output.push_str("}\n\n");

    output.push_str(&format!("impl {name} {{\n"));
    let all: Vec<String> = members.iter().map(|(v, _, _)| format!("Self::{v}")).collect();
    output.push_str(&format!("    pub const ALL: &'static [Self] = &[{}];\n\n", all.join(", ")));
    output.push_str("    /// Literal stored in instances\n");
    output.push_str("    pub fn value(&self) -> &'static str {\n");
    output.push_str("        match *self {\n");
    for (variant, _, literal) in &members {
        output.push_str(&format!("            Self::{variant} => {},\n", string_literal(literal)));
    }
    output.push_str("        }\n");
    output.push_str("    }\n");
    output.push_str("}\n\n");

    // Both the symbolic name and the literal are accepted
    output.push_str(&format!("impl FromValue for {name} {{\n"));
    output.push_str("    fn from_value(value: &Value) -> Option<Self> {\n");
    output.push_str("        match value.as_str()? {\n");
    for (variant, member, literal) in &members {
        let pattern = if member == literal {
            string_literal(literal)
        } else {
            format!("{} | {}", string_literal(literal), string_literal(member))
        };
        output.push_str(&format!("            {pattern} => Some(Self::{variant}),\n"));
    }
    output.push_str("            _ => None,\n");
    output.push_str("        }\n");
    output.push_str("    }\n");
    output.push_str("}\n\n");

    output.push_str(&format!("impl From<{name}> for Value {{\n"));
    output.push_str(&format!("    fn from(value: {name}) -> Self {{\n"));
    output.push_str("        Value::from(value.value())\n");
    output.push_str("    }\n");
    output.push_str("}\n\n");

    output.push_str(&region("items", ""));
    output
}

// =============================================================================
// Package Root
// =============================================================================

/// Render `mod.rs` declaring every module of a package and its `library()`
pub fn emit_package_root(
    ctx: &EmitContext,
    repository: Option<&str>,
    commit: Option<&str>,
) -> String {
    let set = ctx.set;
    let mut output = String::new();

    output.push_str("//! Generated model package\n");
    output.push_str("//!\n");
    match ctx.source {
        Some(source) => output.push_str(&format!("//! Generated by modelkit from `{source}`.\n")),
        None => output.push_str("//! Generated by modelkit.\n"),
    }
    if let Some(docstring) = &set.docstring {
        output.push_str("//!\n");
        doc_lines(&mut output, "//!", docstring);
    }
    output.push('\n');

    let mut modules: Vec<(String, Vec<String>)> = Vec::new();
    for class in set.classes() {
        let mut exports = vec![type_name(&class.name)];
        exports.extend(
            class
                .attributes
                .iter()
                .filter(|a| a.is_union())
                .map(|a| union_name(&class.name, &a.name)),
        );
        modules.push((module_name(&class.name), exports));
    }
    for enumeration in set.enums() {
        modules.push((module_name(&enumeration.name), vec![type_name(&enumeration.name)]));
    }
    modules.sort();

    for (module, _) in &modules {
        output.push_str(&format!("pub mod {module};\n"));
    }
    output.push('\n');
    for (module, exports) in &modules {
        match exports.as_slice() {
            [single] => output.push_str(&format!("pub use {module}::{single};\n")),
            _ => output.push_str(&format!("pub use {module}::{{{}}};\n", exports.join(", "))),
        }
    }
    output.push('\n');

    output.push_str("use modelkit::runtime::Library;\n\n");
    output.push_str("/// Repository the specification was generated from\n");
    output.push_str(&format!("pub const REPOSITORY: Option<&str> = {};\n", option_literal(repository)));
    output.push_str("/// Commit of the repository\n");
    output.push_str(&format!("pub const COMMIT: Option<&str> = {};\n\n", option_literal(commit)));

    output.push_str("/// Library holding every class and enum of this package\n");
    output.push_str("pub fn library() -> modelkit::Result<Library> {\n");
    output.push_str("    let mut builder = Library::builder()");
    for class in set.classes() {
        output.push_str(&format!("\n        .class({}::definition())", module_name(&class.name)));
    }
    for enumeration in set.enums() {
        output.push_str(&format!(
            "\n        .enumeration({}::definition())",
            module_name(&enumeration.name)
        ));
    }
    output.push_str(";\n");
    output.push_str("    if let Some(repository) = REPOSITORY {\n");
    output.push_str("        builder = builder.repository(repository);\n");
    output.push_str("    }\n");
    output.push_str("    if let Some(commit) = COMMIT {\n");
    output.push_str("        builder = builder.commit(commit);\n");
    output.push_str("    }\n");
    output.push_str("    builder.build()\n");
    output.push_str("}\n\n");

    output.push_str(&region("items", ""));
    output
}

fn option_literal(value: Option<&str>) -> String {
    match value {
        Some(value) => format!("Some({})", string_literal(value)),
        None => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph;
    use crate::schema::{parse_diagram, Descriptions};

    fn resolved(diagram: &str) -> SpecificationSet {
        let mut set = parse_diagram(diagram, &Descriptions::default()).unwrap();
        graph::resolve(&mut set).unwrap();
        set
    }

    const ROOT_NESTED: &str = r#"
class Root {
    +string name
    +Nested[] nested_multiple_obj
    +float|string|Nested mixed
}
class Nested {
    +string str_value
    +float float_value
}
"#;

    #[test]
    fn test_type_expressions() {
        let set = resolved(ROOT_NESTED);
        let root = set.class("Root").unwrap();
        let expr = |name: &str| type_expression(&set, "Root", root.get_attribute(name).unwrap());
        assert_eq!(expr("name"), "Option<String>");
        assert_eq!(expr("nested_multiple_obj"), "Vec<Nested>");
        assert_eq!(expr("mixed"), "Option<RootMixed>");
    }

    #[test]
    fn test_single_add_operation() {
        let set = resolved(ROOT_NESTED);
        let code = emit_class(set.class("Root").unwrap(), &EmitContext::new(&set));

        assert_eq!(code.matches("pub fn add_").count(), 1);
        assert!(code.contains(
            "pub fn add_to_nested_multiple_obj(&self, arena: &mut Arena, str_value: Option<String>, float_value: Option<f64>) -> Result<Nested>"
        ));
        assert!(code.contains("use super::nested::Nested;"));
        assert!(code.contains("pub enum RootMixed {\n    Float(f64),\n    String(String),\n    Nested(Nested),\n}"));
        assert!(code.contains("pub struct Root(pub InstanceId);"));
    }

    #[test]
    fn test_union_add_operations_are_named_by_type() {
        let set = resolved(
            r#"
class Shelf {
    +Book|Magazine[] items
}
class Book {
    +string title
}
class Magazine {
    +int issue
}
"#,
        );
        let attribute = set.class("Shelf").unwrap().get_attribute("items").unwrap();
        assert_eq!(
            add_operation_names(&set, attribute),
            vec!["add_book_to_items", "add_magazine_to_items"]
        );
    }

    #[test]
    fn test_definition_round_trips_attributes() {
        let set = resolved(
            r#"
class Sample {
    +string id*
    +int count default=3
    +Part[] parts
}
class Part {
    +string label
}
"#,
        );
        let code = emit_class(set.class("Sample").unwrap(), &EmitContext::new(&set));
        assert!(code.contains(r#".attribute(AttributeDefinition::new("id", [TypeRef::parse("string")]).required())"#));
        assert!(code.contains(r#".attribute(AttributeDefinition::new("count", [TypeRef::parse("integer")]).with_default("3"))"#));
        assert!(code.contains(r#"AttributeDefinition::new("parts", [TypeRef::parse("Part")]).multiple()"#));
        assert!(code.contains("pub fn new(arena: &mut Arena, id: String, count: Option<i64>, parts: Vec<Part>) -> Result<Self>"));
        assert!(code.contains("use super::part::Part;"));
        assert!(code.contains("// modelkit:custom-begin methods"));
    }

    #[test]
    fn test_inherited_attributes_and_parent_conversion() {
        let set = resolved(
            r#"
class Base {
    +string id
}
class Child {
    +float value
}
Base <-- Child
"#,
        );
        let code = emit_class(set.class("Child").unwrap(), &EmitContext::new(&set));
        assert!(code.contains(r#".with_parent("Base")"#));
        assert!(code.contains("pub fn id(&self, arena: &Arena) -> Result<Option<String>>"));
        assert!(code.contains("impl From<Child> for Base"));
        assert!(code.contains("use super::base::Base;"));
        // Inherited attributes stay in the parent's definition
        assert!(!code.contains(r#"AttributeDefinition::new("id""#));
    }

    #[test]
    fn test_reference_accessor() {
        let set = resolved(
            r#"
class Catalog {
    +Entry[] entries
    +string current Entry.id
}
class Entry {
    +string id
}
"#,
        );
        let code = emit_class(set.class("Catalog").unwrap(), &EmitContext::new(&set));
        assert!(code.contains("pub fn resolve_current(&self, arena: &Arena) -> Result<Option<String>>"));
        assert!(code.contains(r#".with_reference("Entry", "id")"#));
    }

    #[test]
    fn test_emit_enum() {
        let set = resolved(
            r#"
class Paint {
    +Color color
}
class Color {
    <<Enumeration>>
    RED = "red"
    GREEN = "green"
}
"#,
        );
        let code = emit_enum(set.enumeration("Color").unwrap(), &EmitContext::new(&set));
        assert!(code.contains("pub enum Color {\n    Red,\n    Green,\n}"));
        assert!(code.contains(r#"Self::Red => "red","#));
        assert!(code.contains(r#""red" | "RED" => Some(Self::Red),"#));
        assert!(code.contains(r#".member("GREEN", "green")"#));
    }

    #[test]
    fn test_package_root() {
        let set = resolved(ROOT_NESTED);
        let code = emit_package_root(
            &EmitContext::new(&set).with_source("model.mmd"),
            Some("https://github.com/org/models"),
            None,
        );
        assert!(code.contains("pub mod nested;\npub mod root;\n"));
        assert!(code.contains("pub use root::{Root, RootMixed};"));
        assert!(code.contains(r#"pub const REPOSITORY: Option<&str> = Some("https://github.com/org/models");"#));
        assert!(code.contains("pub const COMMIT: Option<&str> = None;"));
        assert!(code.contains(".class(root::definition())"));
        assert!(code.contains("Generated by modelkit from `model.mmd`."));
    }
}
