//! Resource and module addresses.
//!
//! An address is the identity key of a resource inside a state document:
//!
//! ```text
//! module.net[0].module.sub["eu"].data.aws_ami.base[2]
//! └──────── module path ───────┘ └mode┘└ type ┘└name┘└key┘
//! ```
//!
//! The module path is kept as an ordered list of [`ModuleStep`]s rather than a
//! flat string, so `module.x[0].null_resource.a` and `module.x[1].null_resource.a`
//! are different addresses by construction.
//!
//! [`fmt::Display`] renders the canonical Terraform form, which is also the
//! form handed to `terraform state mv`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// AddressError
// ---------------------------------------------------------------------------

/// A resource or module address could not be parsed.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid address `{input}` at offset {offset}: {reason}")]
pub struct AddressError {
    /// The full input that failed to parse.
    pub input: String,
    /// Byte offset of the offending character.
    pub offset: usize,
    /// What was expected.
    pub reason: String,
}

// ---------------------------------------------------------------------------
// InstanceKey
// ---------------------------------------------------------------------------

/// The instance key of a counted (`[0]`) or `for_each` (`["a"]`) object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    /// `count` index.
    Int(i64),
    /// `for_each` key.
    Str(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "[{i}]"),
            Self::Str(s) => {
                // JSON string escaping matches the HCL quoted-string form
                // terraform prints for keys.
                let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                write!(f, "[{quoted}]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

/// Whether a resource is managed or a data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `resource` block.
    Managed,
    /// `data` block.
    Data,
}

impl Mode {
    /// The spelling used in the state `mode` field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Managed => "managed",
            Self::Data => "data",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "managed" => Ok(Self::Managed),
            "data" => Ok(Self::Data),
            other => Err(format!("unknown resource mode `{other}`")),
        }
    }
}

// ---------------------------------------------------------------------------
// ModulePath
// ---------------------------------------------------------------------------

/// One `module.<name>[<key>]` step of a module path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleStep {
    /// Module call name.
    pub name: String,
    /// Instance key when the module call uses `count`/`for_each`.
    pub key: Option<InstanceKey>,
}

impl ModuleStep {
    /// A step without an instance key.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// A step with an instance key.
    pub fn keyed(name: impl Into<String>, key: InstanceKey) -> Self {
        Self {
            name: name.into(),
            key: Some(key),
        }
    }
}

impl fmt::Display for ModuleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module.{}", self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// Ordered module path; empty for the root module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(Vec<ModuleStep>);

impl ModulePath {
    /// The root module.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from explicit steps.
    #[must_use]
    pub const fn from_steps(steps: Vec<ModuleStep>) -> Self {
        Self(steps)
    }

    /// Parse the module-only form found in the state `module` field
    /// (`module.a[0].module.b`). The empty string is the root module.
    ///
    /// # Errors
    /// Returns [`AddressError`] if `raw` is not a well-formed module path.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let mut cursor = Cursor::new(raw);
        let mut steps = Vec::new();
        if cursor.at_end() {
            return Ok(Self::root());
        }
        loop {
            steps.push(cursor.module_step()?);
            if cursor.at_end() {
                return Ok(Self(steps));
            }
            cursor.expect('.')?;
        }
    }

    /// Whether this is the root module.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// The steps, outermost first.
    #[must_use]
    pub fn steps(&self) -> &[ModuleStep] {
        &self.0
    }

    /// Module names with instance keys stripped (`module.a.module.b`).
    #[must_use]
    pub fn family(&self) -> String {
        self.0
            .iter()
            .map(|s| format!("module.{}", s.name))
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ResourceAddress
// ---------------------------------------------------------------------------

/// The identity of a resource (or one of its instances) inside a state.
///
/// Equality is structural over every component, instance keys included.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceAddress {
    /// Module path (root when empty).
    pub module: ModulePath,
    /// Managed resource or data source.
    pub mode: Mode,
    /// Resource type, e.g. `null_resource`.
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Instance key for a single instance of a counted/`for_each` resource.
    pub key: Option<InstanceKey>,
}

impl ResourceAddress {
    /// A resource-level address (no instance key).
    pub fn new(
        module: ModulePath,
        mode: Mode,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module,
            mode,
            resource_type: resource_type.into(),
            name: name.into(),
            key: None,
        }
    }

    /// Parse a full address string.
    ///
    /// # Errors
    /// Returns [`AddressError`] on any syntax problem, including wildcard
    /// keys (`[*]`), which select rather than identify.
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let mut cursor = Cursor::new(raw);
        let mut steps = Vec::new();
        while cursor.peek_keyword("module.") {
            steps.push(cursor.module_step()?);
            cursor.expect('.')?;
        }

        let mode = if cursor.peek_keyword("data.") {
            cursor.advance("data.".len());
            Mode::Data
        } else {
            Mode::Managed
        };
        let resource_type = cursor.ident()?;
        cursor.expect('.')?;
        let name = cursor.ident()?;
        let key = cursor.optional_key()?;
        if !cursor.at_end() {
            return Err(cursor.error("unexpected trailing input"));
        }

        Ok(Self {
            module: ModulePath(steps),
            mode,
            resource_type,
            name,
            key,
        })
    }

    /// The same address pointing at one instance.
    #[must_use]
    pub fn with_key(&self, key: Option<InstanceKey>) -> Self {
        Self {
            key,
            ..self.clone()
        }
    }

    /// The resource-level address (instance key dropped).
    #[must_use]
    pub fn resource(&self) -> Self {
        self.with_key(None)
    }

    /// Module names with instance keys stripped; used to group addresses
    /// for reporting, never for conflict decisions.
    #[must_use]
    pub fn module_family(&self) -> String {
        self.module.family()
    }
}

/// Whether two addresses live under the same module call chain, ignoring
/// module instance keys.
#[must_use]
pub fn same_module_family(a: &ResourceAddress, b: &ResourceAddress) -> bool {
    a.module.0.len() == b.module.0.len()
        && a.module
            .0
            .iter()
            .zip(&b.module.0)
            .all(|(x, y)| x.name == y.name)
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        if self.mode == Mode::Data {
            f.write_str("data.")?;
        }
        write!(f, "{}.{}", self.resource_type, self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

impl FromStr for ResourceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ResourceAddress> for String {
    fn from(addr: ResourceAddress) -> Self {
        addr.to_string()
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn peek_keyword(&self, kw: &str) -> bool {
        self.rest().starts_with(kw)
    }

    fn error(&self, reason: &str) -> AddressError {
        AddressError {
            input: self.input.to_owned(),
            offset: self.pos,
            reason: reason.to_owned(),
        }
    }

    fn expect(&mut self, c: char) -> Result<(), AddressError> {
        if self.rest().starts_with(c) {
            self.advance(c.len_utf8());
            Ok(())
        } else {
            Err(self.error(&format!("expected `{c}`")))
        }
    }

    /// Identifiers: a letter or `_`, then letters, digits, `_` or `-`.
    fn ident(&mut self) -> Result<String, AddressError> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(self.error("expected identifier")),
        }
        let end = chars
            .find(|&(_, c)| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .map_or(rest.len(), |(i, _)| i);
        let ident = rest[..end].to_owned();
        self.advance(end);
        Ok(ident)
    }

    fn module_step(&mut self) -> Result<ModuleStep, AddressError> {
        if !self.peek_keyword("module.") {
            return Err(self.error("expected `module.`"));
        }
        self.advance("module.".len());
        let name = self.ident()?;
        let key = self.optional_key()?;
        Ok(ModuleStep { name, key })
    }

    fn optional_key(&mut self) -> Result<Option<InstanceKey>, AddressError> {
        if !self.rest().starts_with('[') {
            return Ok(None);
        }
        self.advance(1);
        let key = match self.rest().chars().next() {
            Some('"') => InstanceKey::Str(self.quoted()?),
            Some('*') => return Err(self.error("wildcard keys are not addresses")),
            Some(c) if c == '-' || c.is_ascii_digit() => InstanceKey::Int(self.integer()?),
            _ => return Err(self.error("expected integer or quoted string key")),
        };
        self.expect(']')?;
        Ok(Some(key))
    }

    fn integer(&mut self) -> Result<i64, AddressError> {
        let rest = self.rest();
        let end = rest
            .char_indices()
            .skip(1)
            .find(|&(_, c)| !c.is_ascii_digit())
            .map_or(rest.len(), |(i, _)| i);
        let value = rest[..end]
            .parse::<i64>()
            .map_err(|e| self.error(&format!("bad integer key: {e}")))?;
        self.advance(end);
        Ok(value)
    }

    fn quoted(&mut self) -> Result<String, AddressError> {
        let rest = self.rest();
        let mut escaped = false;
        let mut close = None;
        for (i, c) in rest.char_indices().skip(1) {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => {
                    close = Some(i);
                    break;
                }
                _ => {}
            }
        }
        let Some(close) = close else {
            return Err(self.error("unterminated string key"));
        };
        let literal = &rest[..=close];
        let value: String = serde_json::from_str(literal)
            .map_err(|e| self.error(&format!("bad string key: {e}")))?;
        self.advance(literal.len());
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
