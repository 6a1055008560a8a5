//! Error output helpers
// (c) 2024 Ross Younger

use figment::error::{Kind, OneOf};
use thiserror::Error;

/// Wraps a figment error, implementing a more readable `Display`
#[derive(Debug, Error, PartialEq)]
pub struct ConfigFileError(#[source] Box<figment::Error>);

impl From<figment::Error> for ConfigFileError {
    fn from(e: figment::Error) -> Self {
        Self(Box::new(e))
    }
}

impl std::ops::Deref for ConfigFileError {
    type Target = figment::Error;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ConfigFileError {
    fn fmt_kind(kind: &Kind, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match kind {
            Kind::InvalidType(v, exp) => write!(f, "invalid type: found {v}, expected {exp}"),
            Kind::UnknownVariant(v, exp) => {
                write!(f, "unknown variant: found {v}, expected {}", OneOf(exp))
            }
            Kind::UnknownField(field, _) => write!(f, "unknown setting `{field}`"),
            _ => std::fmt::Display::fmt(&kind, f),
        }
    }
}

impl std::fmt::Display for ConfigFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Self::fmt_kind(&self.kind, f)?;
        if let Some(key) = self.path.last() {
            write!(f, " for {key}")?;
        }
        if let Some(md) = &self.metadata {
            if let Some(source) = &md.source {
                write!(f, " at {source}")?;
            } else {
                write!(f, " in {}", md.name)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::ConfigFileError;
    use figment::error::{Actual, Kind};
    use pretty_assertions::assert_eq;

    #[test]
    fn invalid_type() {
        let err = ConfigFileError::from(figment::Error::from(Kind::InvalidType(
            Actual::Str("fast".into()),
            "u64".to_string(),
        )));
        assert_eq!(
            err.to_string(),
            "invalid type: found string \"fast\", expected u64"
        );
    }

    #[test]
    fn unknown_variant() {
        let knowns = &["local", "utc"];
        let err = ConfigFileError::from(figment::Error::from(Kind::UnknownVariant(
            "martian".to_string(),
            knowns,
        )));
        assert_eq!(
            err.to_string(),
            "unknown variant: found martian, expected `local` or `utc`"
        );
    }

    #[test]
    fn with_path_and_source() {
        let mut e = figment::Error::from(Kind::InvalidType(Actual::Str("x".into()), "u32".into()));
        e.path = vec!["recv_attempts".into()];
        e.metadata = Some(figment::Metadata::named("environment variable(s)"));
        let err = ConfigFileError::from(e);
        assert_eq!(
            err.to_string(),
            "invalid type: found string \"x\", expected u32 for recv_attempts in environment variable(s)"
        );
    }
}
