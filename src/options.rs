//! Compilation settings.
//!
//! Options are plain values passed into [`crate::compile_with`]. They
//! are built with chained setters:
//!
//! ```
//! use erde::{CompileOptions, Target};
//!
//! let options = CompileOptions::new().target(Target::Lua54);
//! assert_eq!(options.target, Target::Lua54);
//! ```

use std::fmt;
use std::str::FromStr;

/// Lua version the generated code must run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Target {
    Lua51,
    /// Portable output that runs on 5.1 and every later version.
    #[default]
    Lua51Plus,
    Lua52,
    Lua53,
    Lua54,
    LuaJit,
}

impl Target {
    pub const ALL: [Self; 6] = [
        Self::Lua51,
        Self::Lua51Plus,
        Self::Lua52,
        Self::Lua53,
        Self::Lua54,
        Self::LuaJit,
    ];

    /// `goto` and labels are available.
    #[must_use]
    pub const fn has_goto(self) -> bool {
        matches!(self, Self::Lua52 | Self::Lua53 | Self::Lua54 | Self::LuaJit)
    }

    /// Bitwise operators and `//` are part of the language.
    #[must_use]
    pub const fn has_integer_ops(self) -> bool {
        matches!(self, Self::Lua53 | Self::Lua54)
    }

    /// `\xXX` and `\z` string escapes are understood.
    #[must_use]
    pub const fn has_hex_escapes(self) -> bool {
        !matches!(self, Self::Lua51 | Self::Lua51Plus)
    }

    /// `\u{XXX}` string escapes are understood.
    #[must_use]
    pub const fn has_utf8_escapes(self) -> bool {
        matches!(self, Self::Lua53 | Self::Lua54)
    }

    /// Library providing bitwise functions when there are no operators.
    #[must_use]
    pub const fn default_bitlib(self) -> Option<&'static str> {
        match self {
            Self::Lua53 | Self::Lua54 => None,
            Self::Lua52 => Some("bit32"),
            Self::Lua51 | Self::Lua51Plus | Self::LuaJit => Some("bit"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lua51 => "5.1",
            Self::Lua51Plus => "5.1+",
            Self::Lua52 => "5.2",
            Self::Lua53 => "5.3",
            Self::Lua54 => "5.4",
            Self::LuaJit => "jit",
        };
        f.write_str(name)
    }
}

/// Error produced when reading options from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OptionsError {
    #[error("unknown Lua target '{0}' (expected one of 5.1, 5.1+, 5.2, 5.3, 5.4, jit)")]
    UnknownTarget(String),
}

impl FromStr for Target {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_string() == s)
            .ok_or_else(|| OptionsError::UnknownTarget(s.to_string()))
    }
}

/// Settings for one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    pub target: Target,
    /// Module `require`d for bitwise operators on targets without
    /// native ones. Ignored on 5.3 and 5.4.
    pub bitlib: Option<String>,
}

impl CompileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Lua target.
    #[must_use]
    pub const fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Override the bitwise library module name.
    #[must_use]
    pub fn bitlib(mut self, name: &str) -> Self {
        self.bitlib = Some(name.to_string());
        self
    }

    /// Library to call for bitwise operators, or `None` when the target
    /// has native operators.
    #[must_use]
    pub fn bitlib_name(&self) -> Option<&str> {
        let default = self.target.default_bitlib()?;
        Some(self.bitlib.as_deref().unwrap_or(default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names_roundtrip() {
        for target in Target::ALL {
            assert_eq!(target.to_string().parse::<Target>(), Ok(target));
        }
    }

    #[test]
    fn unknown_target() {
        let err = "5.5".parse::<Target>().unwrap_err();
        assert_eq!(err, OptionsError::UnknownTarget("5.5".to_string()));
        assert!(err.to_string().contains("5.5"));
    }

    #[test]
    fn bitlib_defaults_and_override() {
        assert_eq!(CompileOptions::new().bitlib_name(), Some("bit"));
        assert_eq!(
            CompileOptions::new().target(Target::Lua52).bitlib_name(),
            Some("bit32")
        );
        assert_eq!(
            CompileOptions::new().target(Target::Lua54).bitlib("x").bitlib_name(),
            None
        );
        assert_eq!(
            CompileOptions::new().bitlib("bitop").bitlib_name(),
            Some("bitop")
        );
    }
}
