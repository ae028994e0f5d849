//! # Option and Path Validation
//!
//! Everything the user hands us is checked here before the first upload: the
//! request options against the values the service understands, and the input
//! files and output directory against the filesystem. Every failure is a
//! `Validation` error, which stops the run with exit status 3.

use crate::error::{AppError, AppResult};
use std::fmt;
use std::fs::{self, File};
use std::path::Path;
use std::str::FromStr;

/// What the service does with profanity in the translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfanityAction {
    Marked,
    Deleted,
    NoAction,
}

impl ProfanityAction {
    pub const ALL: &'static [ProfanityAction] =
        &[ProfanityAction::Marked, ProfanityAction::Deleted, ProfanityAction::NoAction];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfanityAction::Marked => "Marked",
            ProfanityAction::Deleted => "Deleted",
            ProfanityAction::NoAction => "NoAction",
        }
    }
}

/// How marked profanity is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfanityMarker {
    Asterisk,
    Tag,
}

impl ProfanityMarker {
    pub const ALL: &'static [ProfanityMarker] = &[ProfanityMarker::Asterisk, ProfanityMarker::Tag];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfanityMarker::Asterisk => "Asterisk",
            ProfanityMarker::Tag => "Tag",
        }
    }
}

/// Format of the translated audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
}

impl AudioFormat {
    pub const ALL: &'static [AudioFormat] = &[AudioFormat::Wav, AudioFormat::Mp3];

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Mp3 => "audio/mp3",
        }
    }
}

/// Optional service features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    TextToSpeech,
    Partial,
    TimingInfo,
}

impl Feature {
    pub const ALL: &'static [Feature] = &[Feature::TextToSpeech, Feature::Partial, Feature::TimingInfo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::TextToSpeech => "TextToSpeech",
            Feature::Partial => "Partial",
            Feature::TimingInfo => "TimingInfo",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfanityAction {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        find_option("profanity action", value, Self::ALL, Self::as_str)
    }
}

impl FromStr for ProfanityMarker {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        find_option("profanity marker", value, Self::ALL, Self::as_str)
    }
}

impl FromStr for AudioFormat {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        find_option("audio format", value, Self::ALL, Self::as_str)
    }
}

impl FromStr for Feature {
    type Err = AppError;

    fn from_str(value: &str) -> AppResult<Self> {
        find_option("feature", value, Self::ALL, Self::as_str)
    }
}

/// Look `value` up by its wire spelling; the error lists every allowed value.
fn find_option<T: Copy>(subject: &str, value: &str, all: &[T], as_str: fn(&T) -> &'static str) -> AppResult<T> {
    all.iter().copied().find(|option| as_str(option) == value).ok_or_else(|| {
        let allowed = all.iter().map(as_str).collect::<Vec<_>>().join(", ");
        AppError::validation(subject, format!("'{}' is not one of: {}", value, allowed))
    })
}

/// Parse a comma separated feature list. An empty list is allowed.
pub fn parse_features(list: &str) -> AppResult<Vec<Feature>> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse::<Feature>)
        .collect()
}

/// Language codes go into the query string as given; reject obvious mistakes.
pub fn validate_language(flag: &str, code: &str) -> AppResult<()> {
    if code.trim().is_empty() {
        return Err(AppError::validation(flag, "language code must not be empty"));
    }
    if code.chars().any(char::is_whitespace) {
        return Err(AppError::validation(flag, format!("'{}' contains whitespace", code)));
    }
    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

/// An input must exist, be a readable non-empty regular file and not be hidden.
pub fn validate_input_file(path: &Path) -> AppResult<()> {
    let subject = path.display();
    let meta = fs::metadata(path).map_err(|_| AppError::validation(&subject, "file does not exist"))?;

    if meta.is_dir() {
        return Err(AppError::validation(&subject, "is a directory, not a file"));
    }
    if is_hidden(path) {
        return Err(AppError::validation(&subject, "hidden files are not uploaded"));
    }
    if meta.len() == 0 {
        return Err(AppError::validation(&subject, "file is empty"));
    }
    File::open(path).map_err(|e| AppError::validation(&subject, format!("file is not readable: {}", e)))?;

    Ok(())
}

/// The output directory must exist, be a writable directory and not be hidden.
pub fn validate_output_dir(path: &Path) -> AppResult<()> {
    let subject = path.display();
    let meta = fs::metadata(path).map_err(|_| AppError::validation(&subject, "directory does not exist"))?;

    if !meta.is_dir() {
        return Err(AppError::validation(&subject, "is not a directory"));
    }
    if is_hidden(path) {
        return Err(AppError::validation(&subject, "hidden directories are not used for output"));
    }
    if meta.permissions().readonly() {
        return Err(AppError::validation(&subject, "directory is not writable"));
    }

    Ok(())
}
