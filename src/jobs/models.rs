use super::error::JobError;
use crate::store::Fields;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Allowed moves: pending -> processing -> completed | failed
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Field names of a job record
pub mod fields {
    pub const ID: &str = "id";
    pub const URL: &str = "url";
    pub const STATUS: &str = "status";
    pub const MESSAGE: &str = "message";
    pub const CREATED_AT: &str = "created_at";
    pub const ARTIFACT: &str = "artifact";
    pub const TITLE: &str = "title";

    pub const FILENAME: &str = "filename";
    pub const PATH: &str = "path";
    pub const CONTENT_TYPE: &str = "content_type";
}

/// A single fetch request and its progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub url: String,
    pub status: JobStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Artifact filename, present once the job completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// Media title reported by the fetch tool, set on completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl JobRecord {
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            (fields::ID, self.id.clone()),
            (fields::URL, self.url.clone()),
            (fields::STATUS, self.status.as_str().to_string()),
            (fields::MESSAGE, self.message.clone()),
            (
                fields::CREATED_AT,
                self.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
        ];
        if let Some(artifact) = &self.artifact {
            out.push((fields::ARTIFACT, artifact.clone()));
        }
        if let Some(title) = &self.title {
            out.push((fields::TITLE, title.clone()));
        }
        out
    }

    pub fn from_fields(key: &str, map: &Fields) -> Result<Self, JobError> {
        let status = required(key, map, fields::STATUS)?
            .parse()
            .map_err(|reason| JobError::CorruptRecord {
                key: key.to_string(),
                reason,
            })?;
        let created_at = DateTime::parse_from_rfc3339(required(key, map, fields::CREATED_AT)?)
            .map_err(|e| JobError::CorruptRecord {
                key: key.to_string(),
                reason: format!("bad created_at: {e}"),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            id: required(key, map, fields::ID)?.to_string(),
            url: required(key, map, fields::URL)?.to_string(),
            status,
            message: map.get(fields::MESSAGE).cloned().unwrap_or_default(),
            created_at,
            artifact: map.get(fields::ARTIFACT).cloned(),
            title: map.get(fields::TITLE).cloned(),
        })
    }
}

/// Metadata of a completed job's artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub filename: String,
    pub path: String,
    pub content_type: String,
}

impl ResultRecord {
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (fields::FILENAME, self.filename.clone()),
            (fields::PATH, self.path.clone()),
            (fields::CONTENT_TYPE, self.content_type.clone()),
        ]
    }

    pub fn from_fields(key: &str, map: &Fields) -> Result<Self, JobError> {
        Ok(Self {
            filename: required(key, map, fields::FILENAME)?.to_string(),
            path: required(key, map, fields::PATH)?.to_string(),
            content_type: required(key, map, fields::CONTENT_TYPE)?.to_string(),
        })
    }
}

fn required<'a>(key: &str, map: &'a Fields, name: &str) -> Result<&'a str, JobError> {
    map.get(name)
        .map(String::as_str)
        .ok_or_else(|| JobError::CorruptRecord {
            key: key.to_string(),
            reason: format!("missing field '{name}'"),
        })
}
