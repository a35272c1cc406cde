//! Parameter-style normalization.
//!
//! Translates a descriptor's dialect-neutral placeholders into the exact bind
//! syntax a target driver expects, and materializes the caller's arguments in
//! the matching shape: an ordered vector for drivers that bind by position, a
//! name→value mapping for drivers that bind by name. Rewriting works off the
//! placeholder spans recorded by the parser, so string literals, casts, and
//! comments are never touched, and every occurrence of a repeated name is
//! substituted consistently.

use crate::driver::Value;
use crate::error::{Result, StashError};
use crate::parse::QueryDescriptor;

/// The bind-parameter syntax a driver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamStyle {
    /// Positional `$1`, `$2`, … (PostgreSQL wire protocol).
    Dollar,
    /// Positional `?` (SQLite, JDBC-style drivers).
    Qmark,
    /// Named `:name`.
    Named,
    /// Named `%(name)s` (pyformat).
    PyFormat,
}

impl ParamStyle {
    /// True if the driver binds arguments by position rather than by name.
    pub fn is_positional(&self) -> bool {
        matches!(self, Self::Dollar | Self::Qmark)
    }
}

/// Caller-supplied arguments for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    /// Values matched to parameters by first-occurrence position.
    Positional(Vec<Value>),
    /// Values matched to parameters by name.
    Named(Vec<(String, Value)>),
}

impl Args {
    /// Arguments for a nullary query.
    pub fn none() -> Self {
        Self::Positional(Vec::new())
    }

    /// Builds positional arguments from anything convertible to [`Value`].
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Builds named arguments from (name, value) pairs.
    pub fn named<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<Value>,
    {
        Self::Named(pairs.into_iter().map(|(n, v)| (n.into(), v.into())).collect())
    }

    /// Number of supplied arguments.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    /// True if no arguments were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up the value for a parameter, by name for named arguments and by
    /// first-occurrence position for positional ones.
    pub fn get(&self, name: &str, position: usize) -> Option<&Value> {
        match self {
            Self::Positional(values) => values.get(position),
            Self::Named(pairs) => pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v),
        }
    }
}

impl Default for Args {
    fn default() -> Self {
        Self::none()
    }
}

/// Arguments resolved against a descriptor, in the shape the driver binds.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundArgs {
    /// Ordered by first-occurrence position in the template.
    Positional(Vec<Value>),
    /// Name→value pairs in first-occurrence order.
    Named(Vec<(String, Value)>),
}

impl BoundArgs {
    /// Returns the positional argument vector, or an internal error if the
    /// engine bound for a named-style driver.
    pub fn as_positional(&self) -> Result<&[Value]> {
        match self {
            Self::Positional(values) => Ok(values),
            Self::Named(_) => Err(StashError::internal(
                "named arguments passed to a positional driver",
            )),
        }
    }

    /// Number of bound arguments.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(pairs) => pairs.len(),
        }
    }

    /// True if the statement takes no arguments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rewrites a descriptor's placeholders into the given style.
///
/// Position numbers follow first-occurrence order of the distinct parameter
/// names; repeated names map to the same position.
pub fn rewrite(descriptor: &QueryDescriptor, style: ParamStyle) -> String {
    let template = &descriptor.sql_template;
    let mut sql = String::with_capacity(template.len());
    let mut cursor = 0usize;

    for placeholder in &descriptor.placeholders {
        sql.push_str(&template[cursor..placeholder.start]);
        let position = descriptor
            .parameters
            .iter()
            .position(|p| p == &placeholder.name)
            .expect("placeholder name is always registered as a parameter");
        match style {
            ParamStyle::Dollar => sql.push_str(&format!("${}", position + 1)),
            ParamStyle::Qmark => sql.push('?'),
            ParamStyle::Named => {
                sql.push(':');
                sql.push_str(&placeholder.name);
            }
            ParamStyle::PyFormat => {
                sql.push_str("%(");
                sql.push_str(&placeholder.name);
                sql.push_str(")s");
            }
        }
        cursor = placeholder.end;
    }
    sql.push_str(&template[cursor..]);
    sql
}

/// Resolves caller arguments against a descriptor.
///
/// Every template parameter must have a bound value; a missing one is a
/// binding error reported before any driver I/O. A bound value with no
/// matching template parameter (a surplus positional, or a named argument
/// with an unknown name) is ignored, unless `strict` is set, in which case
/// it is an unexpected-parameter error.
pub fn bind(
    descriptor: &QueryDescriptor,
    args: &Args,
    style: ParamStyle,
    strict: bool,
) -> Result<BoundArgs> {
    if strict {
        match args {
            Args::Positional(values) if values.len() > descriptor.parameters.len() => {
                let name = format!("#{}", descriptor.parameters.len() + 1);
                return Err(StashError::unexpected_parameter(&descriptor.name, name));
            }
            Args::Named(pairs) => {
                for (name, _) in pairs {
                    if !descriptor.parameters.iter().any(|p| p == name) {
                        return Err(StashError::unexpected_parameter(&descriptor.name, name));
                    }
                }
            }
            _ => {}
        }
    }

    let mut resolved: Vec<(String, Value)> = Vec::with_capacity(descriptor.parameters.len());
    for (position, parameter) in descriptor.parameters.iter().enumerate() {
        let value = args
            .get(parameter, position)
            .ok_or_else(|| StashError::missing_parameter(&descriptor.name, parameter))?;
        resolved.push((parameter.clone(), value.clone()));
    }

    Ok(if style.is_positional() {
        BoundArgs::Positional(resolved.into_iter().map(|(_, v)| v).collect())
    } else {
        BoundArgs::Named(resolved)
    })
}
