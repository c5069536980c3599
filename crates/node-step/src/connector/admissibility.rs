//! Decides whether a connector type can live inside a resumable node step.
//!
//! A type is admissible only when its whole declared state can be written to a
//! checkpoint and rebuilt after a restart. The walk covers the type, every type
//! it extends and every connector it composes. Anything the walk cannot prove
//! safe is rejected.

use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use super::{ConnectorRegistry, ConnectorShape, ConnectorType, FieldType};

/// Longest inheritance or composition chain the walk will follow.
pub const MAX_DEPTH: usize = 16;

/// Verdict for one connector kind; inadmissible verdicts carry the first reason found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admissibility {
    kind: String,
    reason: Option<String>,
}

impl Admissibility {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_admissible(&self) -> bool {
        self.reason.is_none()
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

pub fn check(registry: &ConnectorRegistry, kind: &str) -> Admissibility {
    let mut walk = Walk {
        registry,
        visited: BTreeSet::new(),
    };
    Admissibility {
        kind: kind.to_string(),
        reason: walk.kind(kind, kind, 0).err(),
    }
}

struct Walk<'a> {
    registry: &'a ConnectorRegistry,
    visited: BTreeSet<String>,
}

impl Walk<'_> {
    fn kind(&mut self, kind: &str, path: &str, depth: usize) -> Result<(), String> {
        if depth > MAX_DEPTH {
            return Err(format!("{path}: composition is deeper than {MAX_DEPTH}"));
        }
        // Already on the walk: composition cycles are admitted unless something else fails.
        if !self.visited.insert(kind.to_string()) {
            return Ok(());
        }

        let mut lineage = BTreeSet::new();
        let mut current = Some(kind.to_string());
        while let Some(name) = current {
            if lineage.len() > MAX_DEPTH {
                return Err(format!("{path}: inheritance is deeper than {MAX_DEPTH}"));
            }
            if !lineage.insert(name.clone()) {
                return Err(format!("{path}: {name} extends itself"));
            }

            let ty = self
                .registry
                .get(&name)
                .ok_or_else(|| format!("{path}: connector type {name} is not registered"))?;
            let shape = inspect(ty.as_ref()).map_err(|err| format!("{path}: {err}"))?;

            if !shape.rehydratable {
                return Err(format!(
                    "{path}: {name} cannot be rebuilt after a restart"
                ));
            }

            for field in shape.fields.iter().filter(|f| !f.transient) {
                let field_path = format!("{path}.{}", field.name);
                self.field(&field.ty, &field_path, depth)?;
            }

            current = shape.extends;
        }

        Ok(())
    }

    fn field(&mut self, ty: &FieldType, path: &str, depth: usize) -> Result<(), String> {
        match ty {
            FieldType::Text | FieldType::Integer | FieldType::Boolean | FieldType::Duration => {
                Ok(())
            }
            FieldType::List(inner) | FieldType::Map(inner) => self.field(inner, path, depth),
            FieldType::Connector(kind) => self.kind(kind, path, depth + 1),
            FieldType::LiveConnection => Err(format!("{path} holds a live network connection")),
            FieldType::ProcessHandle => Err(format!("{path} holds a raw process handle")),
            FieldType::Opaque(name) => Err(format!(
                "{path} has type {name}, which is not known to be serializable"
            )),
        }
    }
}

/// Reads a type's shape; a failing or panicking inspection counts as inadmissible.
fn inspect(ty: &dyn ConnectorType) -> Result<ConnectorShape, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| ty.shape())) {
        Ok(Ok(shape)) => Ok(shape),
        Ok(Err(err)) => Err(format!("inspecting {} failed: {err}", ty.kind())),
        Err(_) => Err(format!("inspecting {} panicked", ty.kind())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, FieldSpec};
    use crate::error::ConfigurationError;
    use serde_json::Value;
    use std::sync::Arc;

    struct Fixture {
        kind: &'static str,
        shape: fn() -> anyhow::Result<ConnectorShape>,
    }

    impl ConnectorType for Fixture {
        fn kind(&self) -> &str {
            self.kind
        }

        fn display_name(&self) -> &str {
            self.kind
        }

        fn shape(&self) -> anyhow::Result<ConnectorShape> {
            (self.shape)()
        }

        fn instantiate(&self, _: &Value) -> Result<Arc<dyn Connector>, ConfigurationError> {
            Err(ConfigurationError::InvalidSettings {
                kind: self.kind.into(),
                message: "fixture".into(),
            })
        }
    }

    fn registry(fixtures: Vec<Fixture>) -> ConnectorRegistry {
        let mut registry = ConnectorRegistry::new();
        for fixture in fixtures {
            registry.register(Arc::new(fixture));
        }
        registry
    }

    #[test]
    fn value_fields_are_admitted() {
        let registry = registry(vec![Fixture {
            kind: "plain",
            shape: || {
                Ok(ConnectorShape::rehydratable()
                    .field(FieldSpec::new("user", FieldType::Text))
                    .field(FieldSpec::new(
                        "env",
                        FieldType::Map(Box::new(FieldType::Text)),
                    )))
            },
        }]);
        assert!(check(&registry, "plain").is_admissible());
    }

    #[test]
    fn live_connection_is_rejected_with_path() {
        let registry = registry(vec![Fixture {
            kind: "ssh",
            shape: || {
                Ok(ConnectorShape::rehydratable()
                    .field(FieldSpec::new("session", FieldType::LiveConnection)))
            },
        }]);
        let verdict = check(&registry, "ssh");
        assert!(!verdict.is_admissible());
        assert_eq!(
            verdict.reason(),
            Some("ssh.session holds a live network connection")
        );
    }

    #[test]
    fn transient_fields_are_skipped() {
        let registry = registry(vec![Fixture {
            kind: "cached",
            shape: || {
                Ok(ConnectorShape::rehydratable()
                    .field(FieldSpec::new("client", FieldType::LiveConnection).transient()))
            },
        }]);
        assert!(check(&registry, "cached").is_admissible());
    }

    #[test]
    fn inherited_fields_are_checked() {
        let registry = registry(vec![
            Fixture {
                kind: "base",
                shape: || {
                    Ok(ConnectorShape::rehydratable()
                        .field(FieldSpec::new("pid", FieldType::ProcessHandle)))
                },
            },
            Fixture {
                kind: "derived",
                shape: || Ok(ConnectorShape::rehydratable().extending("base")),
            },
        ]);
        let verdict = check(&registry, "derived");
        assert_eq!(verdict.reason(), Some("derived.pid holds a raw process handle"));
    }

    #[test]
    fn composed_connectors_are_walked() {
        let registry = registry(vec![
            Fixture {
                kind: "outer",
                shape: || {
                    Ok(ConnectorShape::rehydratable().field(FieldSpec::new(
                        "fallback",
                        FieldType::Connector("inner".into()),
                    )))
                },
            },
            Fixture {
                kind: "inner",
                shape: || {
                    Ok(ConnectorShape::rehydratable()
                        .field(FieldSpec::new("handle", FieldType::Opaque("Socket".into()))))
                },
            },
        ]);
        let verdict = check(&registry, "outer");
        assert!(verdict
            .reason()
            .unwrap()
            .starts_with("outer.fallback.handle has type Socket"));
    }

    #[test]
    fn composition_cycles_are_admitted() {
        let registry = registry(vec![Fixture {
            kind: "chain",
            shape: || {
                Ok(ConnectorShape::rehydratable().field(FieldSpec::new(
                    "next",
                    FieldType::Connector("chain".into()),
                )))
            },
        }]);
        assert!(check(&registry, "chain").is_admissible());
    }

    #[test]
    fn inheritance_cycle_is_rejected() {
        let registry = registry(vec![Fixture {
            kind: "loop",
            shape: || Ok(ConnectorShape::rehydratable().extending("loop")),
        }]);
        assert_eq!(
            check(&registry, "loop").reason(),
            Some("loop: loop extends itself")
        );
    }

    #[test]
    fn non_rehydratable_and_unknown_types_are_rejected() {
        let registry = registry(vec![
            Fixture {
                kind: "oneshot",
                shape: || Ok(ConnectorShape::default()),
            },
            Fixture {
                kind: "orphan",
                shape: || Ok(ConnectorShape::rehydratable().extending("missing")),
            },
        ]);
        assert!(!check(&registry, "oneshot").is_admissible());
        assert!(!check(&registry, "orphan").is_admissible());
        assert!(!check(&registry, "nothing").is_admissible());
    }

    #[test]
    fn failing_inspection_is_inadmissible() {
        let registry = registry(vec![
            Fixture {
                kind: "broken",
                shape: || Err(anyhow::anyhow!("reflection unavailable")),
            },
            Fixture {
                kind: "panicky",
                shape: || panic!("boom"),
            },
        ]);
        assert_eq!(
            check(&registry, "broken").reason(),
            Some("broken: inspecting broken failed: reflection unavailable")
        );
        assert_eq!(
            check(&registry, "panicky").reason(),
            Some("panicky: inspecting panicky panicked")
        );
    }

    #[test]
    fn verdicts_are_deterministic() {
        let registry = registry(vec![Fixture {
            kind: "ssh",
            shape: || {
                Ok(ConnectorShape::rehydratable()
                    .field(FieldSpec::new("session", FieldType::LiveConnection)))
            },
        }]);
        let first = check(&registry, "ssh");
        for _ in 0..5 {
            assert_eq!(check(&registry, "ssh"), first);
        }
    }
}
