//! Configuration for the trellis workspace engine.
//!
//! The config file is KDL. Only the keys the engine consumes are modeled
//! here; the embedding browser layers its own sections on top of this
//! crate's [`Config`] with its own parser pass.
//!
//! ```kdl
//! workspace {
//!     popups {
//!         open-in-new-pane true
//!         placement "right"
//!         enable-smart-detection true
//!         follow-pane-context true
//!         oauth-auto-close true
//!     }
//!     tab-bar-position "bottom"
//! }
//!
//! debug {
//!     enable-workspace-debug
//! }
//! ```

use std::path::Path;
use std::str::FromStr;

use knuffel::ast::{Literal, TypeName};
use knuffel::decode::Context as DecodeContext;
use knuffel::errors::DecodeError;
use knuffel::span::Spanned;
use knuffel::traits::{DecodeScalar, ErrorSpan};
use miette::{Context, IntoDiagnostic};
use tracing::warn;

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Config {
    #[knuffel(child, default)]
    pub workspace: Workspace,
    #[knuffel(child, default)]
    pub debug: Debug,
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Workspace {
    #[knuffel(child, default)]
    pub popups: Popups,
    #[knuffel(child, unwrap(argument), default)]
    pub tab_bar_position: TabBarPosition,
}

impl Default for Workspace {
    fn default() -> Self {
        Self {
            popups: Popups::default(),
            tab_bar_position: TabBarPosition::default(),
        }
    }
}

#[derive(knuffel::Decode, Debug, Clone, PartialEq)]
pub struct Popups {
    /// When false the engine declines script-initiated windows entirely and
    /// the host falls back to native top-level windows.
    #[knuffel(child, unwrap(argument), default = true)]
    pub open_in_new_pane: bool,
    #[knuffel(child, unwrap(argument), default)]
    pub placement: Placement,
    /// Probe views whose scripts did not declare a window kind.
    #[knuffel(child, unwrap(argument), default = true)]
    pub enable_smart_detection: bool,
    /// Split the originating pane rather than the focused one.
    #[knuffel(child, unwrap(argument), default = true)]
    pub follow_pane_context: bool,
    #[knuffel(child, unwrap(argument), default = true)]
    pub oauth_auto_close: bool,
}

impl Default for Popups {
    fn default() -> Self {
        Self {
            open_in_new_pane: true,
            placement: Placement::default(),
            enable_smart_detection: true,
            follow_pane_context: true,
            oauth_auto_close: true,
        }
    }
}

#[derive(knuffel::Decode, Debug, Default, Clone, PartialEq)]
pub struct Debug {
    /// Verbose focus-event logging.
    #[knuffel(child)]
    pub enable_workspace_debug: bool,
}

/// Where a new popup or tab pane is placed relative to its reference pane.
///
/// Decoded leniently: an unrecognized name is not a config error, it falls
/// back to the right side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Left,
    #[default]
    Right,
    Up,
    Down,
}

impl Placement {
    /// Lenient parse; unrecognized names fall back to the default
    /// placement.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("unrecognized placement {name:?}; falling back to \"right\"");
            Self::default()
        })
    }
}

impl<S: ErrorSpan> DecodeScalar<S> for Placement {
    fn type_check(type_name: &Option<Spanned<TypeName, S>>, ctx: &mut DecodeContext<S>) {
        <String as DecodeScalar<S>>::type_check(type_name, ctx);
    }

    fn raw_decode(
        value: &Spanned<Literal, S>,
        ctx: &mut DecodeContext<S>,
    ) -> Result<Self, DecodeError<S>> {
        let raw = <String as DecodeScalar<S>>::raw_decode(value, ctx)?;
        Ok(Self::from_name(&raw))
    }
}

impl FromStr for Placement {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            _ => Err(UnknownVariant),
        }
    }
}

/// Tab bar placement. Decoded leniently, like [`Placement`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TabBarPosition {
    Top,
    #[default]
    Bottom,
}

impl TabBarPosition {
    /// Lenient parse; unrecognized names fall back to the bottom.
    pub fn from_name(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            warn!("unrecognized tab-bar-position {name:?}; falling back to \"bottom\"");
            Self::default()
        })
    }
}

impl<S: ErrorSpan> DecodeScalar<S> for TabBarPosition {
    fn type_check(type_name: &Option<Spanned<TypeName, S>>, ctx: &mut DecodeContext<S>) {
        <String as DecodeScalar<S>>::type_check(type_name, ctx);
    }

    fn raw_decode(
        value: &Spanned<Literal, S>,
        ctx: &mut DecodeContext<S>,
    ) -> Result<Self, DecodeError<S>> {
        let raw = <String as DecodeScalar<S>>::raw_decode(value, ctx)?;
        Ok(Self::from_name(&raw))
    }
}

impl FromStr for TabBarPosition {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "top" => Ok(Self::Top),
            "bottom" => Ok(Self::Bottom),
            _ => Err(UnknownVariant),
        }
    }
}

/// Error of the lenient scalar parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownVariant;

impl std::fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("unknown variant name")
    }
}

impl std::error::Error for UnknownVariant {}

impl Config {
    pub fn parse(filename: &str, text: &str) -> Result<Self, knuffel::Error> {
        knuffel::parse(filename, text)
    }

    pub fn load(path: &Path) -> miette::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .into_diagnostic()
            .with_context(|| format!("error reading {:?}", path))?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("config.kdl"));

        Self::parse(&filename, &contents).map_err(miette::Report::new)
    }
}
