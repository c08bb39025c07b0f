//! Environment-variable register overrides.
//!
//! There is no flag-based CLI; the register tree is the configuration
//! surface. This module is the one place environment variables are read,
//! letting hosted deployments (containers, systemd units) pin registers
//! without a persisted KV entry.

use crate::register::{RegisterTree, Value};

/// Walk `std::env::vars()`, convert `UAVCAN__NODE__ID`-shaped names to
/// register names (`__` -> `.`, lowercased) and assign each one found as a
/// string value, re-coerced by the register's own `assign` rules. Names
/// that don't match a known register are logged and otherwise ignored;
/// startup never fails because of an unrecognized override.
pub fn apply_env_overrides(tree: &mut RegisterTree, vars: impl Iterator<Item = (String, String)>) {
    for (key, val) in vars {
        let Some(rest) = key.strip_prefix("UAVCAN__") else {
            continue;
        };
        let name = format!("uavcan.{}", rest.to_lowercase().replace("__", "."));

        let Some(current) = tree.find_by_name(&name) else {
            tracing::warn!(register = %name, "environment override for unknown register ignored");
            continue;
        };

        let applied = if current.as_natural16().is_some() {
            val.parse::<u16>()
                .ok()
                .and_then(|n| tree.assign(&name, &Value::natural16(n)).ok())
        } else {
            tree.assign(&name, &Value::String(val.clone())).ok()
        };

        match applied {
            Some(()) => tracing::info!(register = %name, "applied environment override"),
            None => tracing::warn!(register = %name, "environment override rejected: value kind mismatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_natural16_register() {
        let mut tree = RegisterTree::new();
        tree.init_register("uavcan.node.id", Value::natural16(65535), true, true);

        apply_env_overrides(
            &mut tree,
            vec![("UAVCAN__NODE__ID".to_string(), "42".to_string())].into_iter(),
        );

        assert_eq!(tree.find_by_name("uavcan.node.id"), Some(Value::natural16(42)));
    }

    #[test]
    fn overrides_string_register_directly() {
        let mut tree = RegisterTree::new();
        tree.init_register("uavcan.node.description", Value::String(String::new()), true, true);

        apply_env_overrides(
            &mut tree,
            vec![(
                "UAVCAN__NODE__DESCRIPTION".to_string(),
                "bench rig".to_string(),
            )]
            .into_iter(),
        );

        assert_eq!(
            tree.find_by_name("uavcan.node.description"),
            Some(Value::String("bench rig".to_string()))
        );
    }

    #[test]
    fn unknown_register_is_ignored_without_panicking() {
        let mut tree = RegisterTree::new();
        apply_env_overrides(
            &mut tree,
            vec![("UAVCAN__NO__SUCH__THING".to_string(), "1".to_string())].into_iter(),
        );
    }
}
