//! Service identity and the conventional property name chain built from it.

use serde::{Deserialize, Serialize};

/// Identity of the running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub domain: Option<String>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Names consulted for `property`, most specific first.
    ///
    /// For service `orders`, version `1.0`, domain `shop` and command
    /// `create`:
    ///
    /// ```text
    /// orders.1.0.create.timeout
    /// orders.create.timeout
    /// create.timeout
    /// shop.timeout
    /// timeout
    /// ```
    pub fn property_chain(&self, property: &str, command: Option<&str>) -> Vec<String> {
        let full = match command {
            Some(command) if !command.is_empty() => format!("{}.{}", command, property),
            _ => property.to_string(),
        };

        let mut names = vec![
            format!("{}.{}.{}", self.name, self.version, full),
            format!("{}.{}", self.name, full),
        ];
        if full != property {
            names.push(full.clone());
        }
        if let Some(domain) = self.domain.as_deref().filter(|d| !d.is_empty()) {
            names.push(format!("{}.{}", domain, property));
        }
        names.push(property.to_string());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_with_command_and_domain() {
        let identity = ServiceIdentity::new("orders", "1.0").with_domain("shop");
        assert_eq!(
            identity.property_chain("timeout", Some("create")),
            vec![
                "orders.1.0.create.timeout",
                "orders.create.timeout",
                "create.timeout",
                "shop.timeout",
                "timeout",
            ]
        );
    }

    #[test]
    fn test_chain_without_command_or_domain() {
        let identity = ServiceIdentity::new("orders", "2");
        assert_eq!(
            identity.property_chain("timeout", None),
            vec!["orders.2.timeout", "orders.timeout", "timeout"]
        );
    }
}
