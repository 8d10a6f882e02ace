//! Event name formatting.
//!
//! Broadcast events are published under their fully qualified class name
//! (`App\Events\OrderShipped`). Listeners name them relative to a namespace;
//! a leading `.` or `\` opts out and names the event literally.

/// Turns listener-facing event names into wire event names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFormatter {
    namespace: Option<String>,
}

impl EventFormatter {
    /// Create a formatter for `namespace`. An empty namespace disables
    /// prefixing.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: (!namespace.is_empty()).then_some(namespace),
        }
    }

    /// The namespace in use, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Format an event name.
    #[must_use]
    pub fn format(&self, event: &str) -> String {
        if let Some(literal) = event.strip_prefix('.').or_else(|| event.strip_prefix('\\')) {
            return literal.to_string();
        }

        let qualified = match &self.namespace {
            Some(namespace) => format!("{namespace}.{event}"),
            None => event.to_string(),
        };
        qualified.replace('.', "\\")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_event() {
        let formatter = EventFormatter::new("App.Events");
        assert_eq!(formatter.format("OrderShipped"), "App\\Events\\OrderShipped");
        assert_eq!(
            formatter.format("Orders.Shipped"),
            "App\\Events\\Orders\\Shipped"
        );
    }

    #[test]
    fn test_literal_event() {
        let formatter = EventFormatter::new("App.Events");
        assert_eq!(formatter.format(".client-typing"), "client-typing");
        assert_eq!(formatter.format("\\Custom\\Event"), "Custom\\Event");
        // Only the leading marker is stripped, dots after it are kept.
        assert_eq!(formatter.format(".order.shipped"), "order.shipped");
    }

    #[test]
    fn test_no_namespace() {
        let formatter = EventFormatter::new("");
        assert_eq!(formatter.namespace(), None);
        assert_eq!(formatter.format("Orders.Shipped"), "Orders\\Shipped");
        assert_eq!(EventFormatter::default().format("Shipped"), "Shipped");
    }
}
