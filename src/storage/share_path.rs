use std::{fmt, str::FromStr};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of a generated instance id, in hex characters
pub const INSTANCE_ID_LEN: usize = 16;

/// Location of a shared casefile: `<group>/<instance>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SharePath {
    group: String,
    instance: String,
}

impl SharePath {
    pub fn new(group: impl Into<String>, instance: impl Into<String>) -> Result<Self> {
        let group = group.into();
        let instance = instance.into();
        validate_component(&group, &group)?;
        validate_component(&instance, &format!("{}/{}", group, instance))?;
        Ok(Self { group, instance })
    }

    /// Parse `<group>` or `<group>/<instance>`
    ///
    /// A bare group gets a freshly generated instance id.
    pub fn parse(path: &str) -> Result<Self> {
        match path.split_once('/') {
            Some((group, instance)) => Self::new(group, instance),
            None => Self::new(path, generate_instance_id()),
        }
    }

    /// The same group with a new instance id
    pub fn fresh_instance(&self) -> Self {
        Self {
            group: self.group.clone(),
            instance: generate_instance_id(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }
}

impl fmt::Display for SharePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.instance)
    }
}

impl FromStr for SharePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_component(component: &str, whole: &str) -> Result<()> {
    let invalid = component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\0')
        || component.contains('\t')
        || component.contains('\n');
    if invalid {
        return Err(Error::InvalidSharePath(whole.to_string()));
    }
    Ok(())
}

/// A new instance id from host, user, time and a random value
pub fn generate_instance_id() -> String {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .unwrap_or_default();
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let now = chrono::Utc::now().to_rfc3339();
    let nonce = uuid::Uuid::new_v4();

    let mut hasher = Sha256::new();
    hasher.update(host.trim().as_bytes());
    hasher.update([0]);
    hasher.update(user.as_bytes());
    hasher.update([0]);
    hasher.update(now.as_bytes());
    hasher.update([0]);
    hasher.update(nonce.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(INSTANCE_ID_LEN);
    id
}
