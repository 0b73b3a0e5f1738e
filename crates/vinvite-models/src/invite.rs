//! Invite form values, requests and input sanitization.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data_url::ImageDataUrl;
use crate::error::ValidationError;
use crate::photo::Photo;

/// Venue value that unlocks the dev-mode toggles (trimmed, case-insensitive).
pub const DEV_MODE_VENUE: &str = "devmode";

static ANGLE_BRACKETS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[<>]").unwrap());
static JS_SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").unwrap());
static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)on\w+\s*=").unwrap());

/// Strip markup and script injection syntax from user input, then trim.
///
/// Removal runs to a fixed point so that nested payloads such as
/// `javajavascript:script:` cannot reassemble after one pass.
pub fn sanitize_input(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = ANGLE_BRACKETS.replace_all(&current, "");
        let next = JS_SCHEME.replace_all(&next, "");
        let next = EVENT_HANDLER.replace_all(&next, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current.trim().to_string()
}

/// Check whether a venue value unlocks dev mode.
pub fn is_dev_venue(venue: &str) -> bool {
    venue.trim().eq_ignore_ascii_case(DEV_MODE_VENUE)
}

/// Form fields, used for per-field updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormField {
    BrideName,
    GroomName,
    BrideParent,
    GroomParent,
    Date,
    Time,
    Venue,
}

impl FormField {
    /// Label shown in validation messages.
    pub fn label(&self) -> &'static str {
        match self {
            FormField::BrideName => "bride's name",
            FormField::GroomName => "groom's name",
            FormField::BrideParent => "bride's parents",
            FormField::GroomParent => "groom's parents",
            FormField::Date => "date",
            FormField::Time => "time",
            FormField::Venue => "venue",
        }
    }

    /// Fields that must be non-empty on submit.
    pub const REQUIRED: [FormField; 4] = [
        FormField::BrideName,
        FormField::GroomName,
        FormField::Date,
        FormField::Venue,
    ];
}

/// Raw form values as typed by the user. Persisted as `form-cache`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormValues {
    pub bride_name: String,
    pub groom_name: String,
    pub bride_parent: String,
    pub groom_parent: String,
    pub date: String,
    pub time: String,
    pub venue: String,
}

impl FormValues {
    pub fn get(&self, field: FormField) -> &str {
        match field {
            FormField::BrideName => &self.bride_name,
            FormField::GroomName => &self.groom_name,
            FormField::BrideParent => &self.bride_parent,
            FormField::GroomParent => &self.groom_parent,
            FormField::Date => &self.date,
            FormField::Time => &self.time,
            FormField::Venue => &self.venue,
        }
    }

    pub fn set(&mut self, field: FormField, value: impl Into<String>) {
        let value = value.into();
        match field {
            FormField::BrideName => self.bride_name = value,
            FormField::GroomName => self.groom_name = value,
            FormField::BrideParent => self.bride_parent = value,
            FormField::GroomParent => self.groom_parent = value,
            FormField::Date => self.date = value,
            FormField::Time => self.time = value,
            FormField::Venue => self.venue = value,
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        is_dev_venue(&self.venue)
    }

    /// Sanitized copy of every field.
    pub fn sanitized(&self) -> Self {
        Self {
            bride_name: sanitize_input(&self.bride_name),
            groom_name: sanitize_input(&self.groom_name),
            bride_parent: sanitize_input(&self.bride_parent),
            groom_parent: sanitize_input(&self.groom_parent),
            date: sanitize_input(&self.date),
            time: sanitize_input(&self.time),
            venue: sanitize_input(&self.venue),
        }
    }

    /// First required field that is empty after sanitization.
    pub fn validate_required(&self) -> Result<(), ValidationError> {
        let clean = self.sanitized();
        for field in FormField::REQUIRED {
            if clean.get(field).is_empty() {
                return Err(ValidationError::missing_field(field.label()));
            }
        }
        Ok(())
    }
}

/// Stage-skipping switches exposed only in dev mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DevToggles {
    pub skip_extraction: bool,
    pub skip_image_generation: bool,
    pub skip_background_removal: bool,
    pub skip_video_generation: bool,
}

impl DevToggles {
    pub fn any(&self) -> bool {
        self.skip_extraction
            || self.skip_image_generation
            || self.skip_background_removal
            || self.skip_video_generation
    }
}

/// Sanitized request handed to the composition step.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteRequest {
    pub bride_name: String,
    pub groom_name: String,
    pub bride_parent: String,
    pub groom_parent: String,
    pub date: String,
    pub time: String,
    pub venue: String,
    pub photo: Photo,
    pub dev_mode: bool,
    pub processed_artifact: Option<ImageDataUrl>,
}

impl InviteRequest {
    /// Validate required fields and build a sanitized request.
    pub fn from_form(form: &FormValues, photo: Photo) -> Result<Self, ValidationError> {
        form.validate_required()?;
        let clean = form.sanitized();
        Ok(Self {
            dev_mode: form.is_dev_mode(),
            bride_name: clean.bride_name,
            groom_name: clean.groom_name,
            bride_parent: clean.bride_parent,
            groom_parent: clean.groom_parent,
            date: clean.date,
            time: clean.time,
            venue: clean.venue,
            photo,
            processed_artifact: None,
        })
    }

    pub fn with_artifact(mut self, artifact: ImageDataUrl) -> Self {
        self.processed_artifact = Some(artifact);
        self
    }

    /// File name offered for download, e.g. `priya-rohit-invite.mp4`.
    pub fn file_stem(&self) -> String {
        let slug = |s: &str| {
            s.chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect::<String>()
                .split('-')
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("-")
        };
        format!("{}-{}-invite", slug(&self.bride_name), slug(&self.groom_name))
    }
}
