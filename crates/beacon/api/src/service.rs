use std::{borrow::Borrow, fmt, ops, str::FromStr};

use anyhow::{bail, Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// A validated RFC 1123 DNS label, as enforced for namespace and workload
/// names by the orchestrator.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Name(String);

impl FromStr for Name {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, <Self as FromStr>::Err> {
        let re = Regex::new(r"^[a-z0-9]([a-z0-9-]*[a-z0-9])?$")?;
        if name.len() <= 63 && re.is_match(name) {
            Ok(Self(name.into()))
        } else {
            bail!("invalid DNS label: {name:?}")
        }
    }
}

impl From<Name> for String {
    fn from(value: Name) -> Self {
        value.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl ops::Deref for Name {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <String as fmt::Debug>::fmt(&self.0, f)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <String as fmt::Display>::fmt(&self.0, f)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> Result<Self, <D as Deserializer<'de>>::Error>
    where
        D: Deserializer<'de>,
    {
        <String as Deserialize<'de>>::deserialize(deserializer)
            .and_then(|name| Self::from_str(&name).map_err(::serde::de::Error::custom))
    }
}

/// One monitored workload, recreated fresh from live discovery on every
/// reconciliation cycle.
///
/// The derived `Ord` is the stable batch sort key: `(namespace, name)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub namespace: Name,
    pub name: Name,
}

impl ServiceDescriptor {
    pub fn try_new(namespace: &str, name: &str) -> Result<Self> {
        Ok(Self {
            namespace: namespace.parse()?,
            name: name.parse()?,
        })
    }

    /// Stable dashboard UID, unique across all namespaces.
    pub fn uid(&self) -> String {
        format!("{}-{}", self.name, self.namespace)
    }

    pub fn title(&self) -> String {
        format!("{} Dashboard", self.name.to_uppercase())
    }

    /// Prefix shared by all metric selectors of this workload.
    pub fn selector_prefix(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { namespace, name } = self;
        write!(f, "{namespace}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{Name, ServiceDescriptor};

    #[test]
    fn name_accepts_dns_labels() {
        assert!("api".parse::<Name>().is_ok());
        assert!("api-v2".parse::<Name>().is_ok());
        assert!("0x7f".parse::<Name>().is_ok());
    }

    #[test]
    fn name_rejects_invalid_labels() {
        assert!("".parse::<Name>().is_err());
        assert!("Api".parse::<Name>().is_err());
        assert!("api_v2".parse::<Name>().is_err());
        assert!("-api".parse::<Name>().is_err());
        assert!("api-".parse::<Name>().is_err());
        assert!("a".repeat(64).parse::<Name>().is_err());
    }

    #[test]
    fn derived_fields() {
        let service = ServiceDescriptor::try_new("internal", "api").unwrap();
        assert_eq!(service.uid(), "api-internal");
        assert_eq!(service.title(), "API Dashboard");
        assert_eq!(service.selector_prefix(), "internal-api");
    }

    #[test]
    fn sort_key_is_namespace_then_name() {
        let worker = ServiceDescriptor::try_new("internal", "worker").unwrap();
        let api = ServiceDescriptor::try_new("internal", "api").unwrap();
        let edge = ServiceDescriptor::try_new("edge", "worker").unwrap();

        let batch: BTreeSet<_> = [worker.clone(), api.clone(), edge.clone()].into();
        let ordered: Vec<_> = batch.into_iter().collect();
        assert_eq!(ordered, vec![edge, api, worker]);
    }

    #[test]
    fn duplicate_descriptors_collapse() {
        let batch: BTreeSet<_> = [
            ServiceDescriptor::try_new("internal", "api").unwrap(),
            ServiceDescriptor::try_new("internal", "api").unwrap(),
        ]
        .into();
        assert_eq!(batch.len(), 1);
    }
}
