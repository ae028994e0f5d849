//! # Command Line Interface
//!
//! `speechtranslate --from en-US --to it-IT talk.wav interview.wav`
//!
//! Request options given here override the settings file and environment;
//! see [`Cli::overrides`].

use crate::config::ConfigOverrides;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "speechtranslate",
    version,
    about = "Translate speech in WAV files through a streaming translation service"
)]
pub struct Cli {
    /// WAV files to translate, processed in the given order
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Language spoken in the input (e.g. en-US)
    #[arg(long)]
    pub from: String,

    /// Language to translate into (e.g. it-IT)
    #[arg(long)]
    pub to: String,

    /// Appended to the input name for output files
    #[arg(long, value_name = "POSTFIX")]
    pub output_postfix: Option<String>,

    /// Do not write the transcript (.json) file
    #[arg(long)]
    pub omit_text: bool,

    /// Directory for output files (default: current directory)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Comma separated features: TextToSpeech, Partial, TimingInfo
    #[arg(long)]
    pub features: Option<String>,

    /// Voice used for the translated audio
    #[arg(long)]
    pub voice: Option<String>,

    /// Format of the translated audio: audio/wav or audio/mp3
    #[arg(long = "audio", value_name = "FORMAT")]
    pub audio_format: Option<String>,

    /// Marked, Deleted or NoAction
    #[arg(long)]
    pub profanity_action: Option<String>,

    /// Asterisk or Tag
    #[arg(long)]
    pub profanity_marker: Option<String>,

    /// API key for the translation service
    #[arg(long, env = "SPEECHTRANSLATE_SUBSCRIPTION_KEY", hide_env_values = true)]
    pub subscription_key: Option<String>,

    /// Keep going when a file fails
    #[arg(long)]
    pub continue_on_error: bool,

    /// Settings file (default: ~/.speechtranslation/settings.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Options to layer over the loaded configuration.
    ///
    /// Boolean flags can only switch a setting on, so an unset flag leaves the
    /// configured value alone.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            features: self.features.clone(),
            voice: self.voice.clone(),
            audio_format: self.audio_format.clone(),
            profanity_action: self.profanity_action.clone(),
            profanity_marker: self.profanity_marker.clone(),
            subscription_key: self.subscription_key.clone(),
            output_dir: self.output_dir.as_ref().map(|dir| dir.to_string_lossy().into_owned()),
            output_postfix: self.output_postfix.clone(),
            omit_text: self.omit_text.then_some(true),
            continue_on_error: self.continue_on_error.then_some(true),
        }
    }
}
