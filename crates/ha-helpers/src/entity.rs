//! Entity abstraction shared by integration platforms

use async_trait::async_trait;
use ha_core::{STATE_UNAVAILABLE, STATE_UNKNOWN};
use serde_json::Value;

/// An observable point exposed by an integration
#[async_trait]
pub trait Entity: Send + Sync {
    /// Display name
    fn name(&self) -> Option<String> {
        None
    }

    /// Stable identifier within the integration
    fn unique_id(&self) -> Option<String> {
        None
    }

    fn available(&self) -> bool {
        true
    }

    /// Whether the platform should call [`Entity::update`] periodically
    fn should_poll(&self) -> bool {
        true
    }

    /// Current value, `None` while unknown
    fn native_value(&self) -> Option<Value>;

    /// State string as shown to users
    ///
    /// An unavailable entity reports `unavailable` regardless of its last
    /// value so stale readings are never presented as current.
    fn state(&self) -> String {
        if !self.available() {
            return STATE_UNAVAILABLE.to_string();
        }
        match self.native_value() {
            None | Some(Value::Null) => STATE_UNKNOWN.to_string(),
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
        }
    }

    /// Refresh the entity's value
    async fn update(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed {
        value: Option<Value>,
        available: bool,
    }

    impl Entity for Fixed {
        fn available(&self) -> bool {
            self.available
        }

        fn native_value(&self) -> Option<Value> {
            self.value.clone()
        }
    }

    #[test]
    fn test_state_rendering() {
        let cases = [
            (Some(json!(21.5)), true, "21.5"),
            (Some(json!("on")), true, "on"),
            (Some(Value::Null), true, "unknown"),
            (None, true, "unknown"),
            (Some(json!(21.5)), false, "unavailable"),
        ];

        for (value, available, expected) in cases {
            let entity = Fixed { value, available };
            assert_eq!(entity.state(), expected);
        }
    }
}
