//! Operation status vocabulary
//!
//! The server reports status as free-form strings. Parsing is total:
//! anything unrecognized becomes [`OperationStatus::Unknown`], which is
//! treated as still in progress.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Status of a long-running range or template operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationStatus {
    Pending,
    Active,
    Deploying,
    Success,
    Failure,
    Error,
    Aborted,
    NeverDeployed,
    #[default]
    Unknown,
}

impl OperationStatus {
    /// Map a server-reported status string onto the known vocabulary.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "PENDING" => OperationStatus::Pending,
            "ACTIVE" => OperationStatus::Active,
            "DEPLOYING" => OperationStatus::Deploying,
            "SUCCESS" => OperationStatus::Success,
            "FAILURE" => OperationStatus::Failure,
            "ERROR" => OperationStatus::Error,
            "ABORTED" => OperationStatus::Aborted,
            "NEVER DEPLOYED" => OperationStatus::NeverDeployed,
            _ => OperationStatus::Unknown,
        }
    }

    /// Wire form, as the Ludus API spells it
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "PENDING",
            OperationStatus::Active => "ACTIVE",
            OperationStatus::Deploying => "DEPLOYING",
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Failure => "FAILURE",
            OperationStatus::Error => "ERROR",
            OperationStatus::Aborted => "ABORTED",
            OperationStatus::NeverDeployed => "NEVER DEPLOYED",
            OperationStatus::Unknown => "UNKNOWN",
        }
    }

    /// Final outcomes. No further transitions happen from these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Success
                | OperationStatus::Failure
                | OperationStatus::Error
                | OperationStatus::Aborted
        )
    }

    /// Work is queued or executing on the server
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            OperationStatus::Pending | OperationStatus::Active | OperationStatus::Deploying
        )
    }

    /// Terminal outcomes that need user action
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            OperationStatus::Failure | OperationStatus::Error | OperationStatus::Aborted
        )
    }

    /// Human-readable capitalization
    pub fn display_name(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "Pending",
            OperationStatus::Active => "Active",
            OperationStatus::Deploying => "Deploying",
            OperationStatus::Success => "Success",
            OperationStatus::Failure => "Failure",
            OperationStatus::Error => "Error",
            OperationStatus::Aborted => "Aborted",
            OperationStatus::NeverDeployed => "Never Deployed",
            OperationStatus::Unknown => "Unknown",
        }
    }

    /// Display text for a raw server status. States outside the known
    /// vocabulary are shown as the server spelled them.
    pub fn display_label(raw: &str) -> String {
        let trimmed = raw.trim();
        match OperationStatus::parse(trimmed) {
            OperationStatus::Unknown
                if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("unknown") =>
            {
                trimmed.to_string()
            }
            status => status.display_name().to_string(),
        }
    }

    pub fn badge(&self) -> Badge {
        match self {
            OperationStatus::Success => Badge::Success,
            OperationStatus::Failure | OperationStatus::Error => Badge::Danger,
            OperationStatus::Deploying => Badge::Warning,
            OperationStatus::Active => Badge::Info,
            OperationStatus::NeverDeployed => Badge::Outline,
            _ => Badge::Default,
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(OperationStatus::parse(s))
    }
}

impl Serialize for OperationStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().map_or(OperationStatus::Unknown, OperationStatus::parse))
    }
}

/// Visual category used when presenting a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Badge {
    Default,
    Success,
    Warning,
    Danger,
    Info,
    Outline,
}
