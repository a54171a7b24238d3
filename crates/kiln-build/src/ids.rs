//! Identifier value types for modules, packages and types
//!
//! Textual forms are `module:package` for packages and
//! `module:package.Simple` for types. An empty module name is the default
//! module; a type without a dot lives in the default package.

use crate::error::{BuildError, BuildResult};
use std::fmt;
use std::str::FromStr;

/// A module name, possibly empty (the default module)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleId(String);

impl ModuleId {
    /// Create a module id, rejecting names that cannot be written to a ledger
    pub fn new(name: impl Into<String>) -> BuildResult<Self> {
        let name = name.into();
        check_token("module", &name)?;
        if name.contains(':') {
            return Err(BuildError::malformed_key(
                "module",
                name,
                "module names cannot contain ':'",
            ));
        }
        Ok(Self(name))
    }

    /// The default (unnamed) module
    pub fn default_module() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A package inside a module
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId {
    pub module: ModuleId,
    pub name: String,
}

impl PackageId {
    pub fn new(module: ModuleId, name: impl Into<String>) -> BuildResult<Self> {
        let name = name.into();
        check_token("package", &name)?;
        if name.contains(':') {
            return Err(BuildError::malformed_key(
                "package",
                name,
                "package names cannot contain ':'",
            ));
        }
        Ok(Self { module, name })
    }

    /// Package in the default module
    pub fn in_default_module(name: impl Into<String>) -> BuildResult<Self> {
        Self::new(ModuleId::default_module(), name)
    }

    /// Id of a type declared in this package
    pub fn type_id(&self, simple: impl Into<String>) -> BuildResult<TypeId> {
        TypeId::new(self.clone(), simple)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

impl FromStr for PackageId {
    type Err = BuildError;

    fn from_str(s: &str) -> BuildResult<Self> {
        let (module, name) = s
            .split_once(':')
            .ok_or_else(|| BuildError::malformed_key("package", s, "missing ':' separator"))?;
        Self::new(ModuleId::new(module)?, name)
    }
}

/// A fully qualified type: the package that owns it plus its simple name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId {
    pub package: PackageId,
    pub simple: String,
}

impl TypeId {
    pub fn new(package: PackageId, simple: impl Into<String>) -> BuildResult<Self> {
        let simple = simple.into();
        if simple.is_empty() {
            return Err(BuildError::malformed_key(
                "type",
                format!("{}.", package),
                "empty simple name",
            ));
        }
        check_token("type", &simple)?;
        if simple.contains('.') || simple.contains(':') {
            return Err(BuildError::malformed_key(
                "type",
                simple,
                "simple names cannot contain '.' or ':'",
            ));
        }
        Ok(Self { package, simple })
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.package.name.is_empty() {
            write!(f, "{}:{}", self.package.module, self.simple)
        } else {
            write!(
                f,
                "{}:{}.{}",
                self.package.module, self.package.name, self.simple
            )
        }
    }
}

impl FromStr for TypeId {
    type Err = BuildError;

    fn from_str(s: &str) -> BuildResult<Self> {
        let (module, qualified) = s
            .split_once(':')
            .ok_or_else(|| BuildError::malformed_key("type", s, "missing ':' separator"))?;
        let (package, simple) = qualified.rsplit_once('.').unwrap_or(("", qualified));
        let package = PackageId::new(ModuleId::new(module)?, package)?;
        TypeId::new(package, simple)
    }
}

fn check_token(kind: &'static str, value: &str) -> BuildResult<()> {
    if value.chars().any(char::is_whitespace) {
        return Err(BuildError::malformed_key(
            kind,
            value,
            "whitespace is not allowed",
        ));
    }
    Ok(())
}
