//! Theme store.
//!
//! Tracks the light/dark preference, whether the admin skin is active, and
//! user color overrides layered on top of a base palette.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use society_store::PersistenceAdapter;
use tokio::sync::watch;
use tracing::debug;

use crate::domains::UnknownVariant;
use crate::store::{ManagedStore, PersistedState, Store};

pub const STORE_ID: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    System,
    Light,
    Dark,
}

impl ThemeMode {
    /// Light and dark swap. `System` resolves to `Light`.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::System | Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserMode {
    #[default]
    Resident,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorToken {
    Primary,
    Secondary,
    Accent,
    Background,
    Surface,
    Text,
    Border,
}

impl ColorToken {
    pub const ALL: [ColorToken; 7] = [
        Self::Primary,
        Self::Secondary,
        Self::Accent,
        Self::Background,
        Self::Surface,
        Self::Text,
        Self::Border,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Accent => "accent",
            Self::Background => "background",
            Self::Surface => "surface",
            Self::Text => "text",
            Self::Border => "border",
        }
    }
}

impl fmt::Display for ColorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorToken {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| UnknownVariant::new("color token", s))
    }
}

/// `#RGB`, `#RRGGBB` or `#RRGGBBAA`.
pub fn is_valid_hex_color(value: &str) -> bool {
    let Some(digits) = value.strip_prefix('#') else {
        return false;
    };
    matches!(digits.len(), 3 | 6 | 8) && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// A fully resolved set of colors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub dark: bool,
    pub colors: BTreeMap<ColorToken, String>,
}

impl Palette {
    pub fn light() -> Self {
        Self::from_pairs(
            false,
            &[
                (ColorToken::Primary, "#2563EB"),
                (ColorToken::Secondary, "#64748B"),
                (ColorToken::Accent, "#F59E0B"),
                (ColorToken::Background, "#FFFFFF"),
                (ColorToken::Surface, "#F8FAFC"),
                (ColorToken::Text, "#0F172A"),
                (ColorToken::Border, "#E2E8F0"),
            ],
        )
    }

    pub fn dark() -> Self {
        Self::from_pairs(
            true,
            &[
                (ColorToken::Primary, "#60A5FA"),
                (ColorToken::Secondary, "#94A3B8"),
                (ColorToken::Accent, "#FBBF24"),
                (ColorToken::Background, "#0F172A"),
                (ColorToken::Surface, "#1E293B"),
                (ColorToken::Text, "#F1F5F9"),
                (ColorToken::Border, "#334155"),
            ],
        )
    }

    fn from_pairs(dark: bool, pairs: &[(ColorToken, &str)]) -> Self {
        Self {
            dark,
            colors: pairs.iter().map(|(t, c)| (*t, (*c).to_string())).collect(),
        }
    }

    /// Admin screens swap primary and accent for a distinct look.
    fn with_admin_skin(mut self) -> Self {
        let (primary, accent) = if self.dark {
            ("#A78BFA", "#34D399")
        } else {
            ("#7C3AED", "#059669")
        };
        self.colors.insert(ColorToken::Primary, primary.into());
        self.colors.insert(ColorToken::Accent, accent.into());
        self
    }

    pub fn get(&self, token: ColorToken) -> Option<&str> {
        self.colors.get(&token).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThemeState {
    pub theme_mode: ThemeMode,
    pub user_mode: UserMode,
    pub custom_colors: BTreeMap<ColorToken, String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

crate::impl_store_state!(ThemeState);

impl ThemeState {
    pub fn admin_theme_enabled(&self) -> bool {
        self.user_mode == UserMode::Admin
    }

    pub fn has_custom_theme(&self) -> bool {
        !self.custom_colors.is_empty()
    }

    pub fn is_dark(&self, system_prefers_dark: bool) -> bool {
        match self.theme_mode {
            ThemeMode::System => system_prefers_dark,
            ThemeMode::Light => false,
            ThemeMode::Dark => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeSlice {
    pub theme_mode: ThemeMode,
    pub user_mode: UserMode,
    #[serde(default)]
    pub custom_colors: BTreeMap<ColorToken, String>,
}

impl PersistedState for ThemeState {
    type Slice = ThemeSlice;

    fn to_slice(&self) -> ThemeSlice {
        ThemeSlice {
            theme_mode: self.theme_mode,
            user_mode: self.user_mode,
            custom_colors: self.custom_colors.clone(),
        }
    }

    fn apply_slice(&mut self, slice: ThemeSlice) {
        self.theme_mode = slice.theme_mode;
        self.user_mode = slice.user_mode;
        self.custom_colors = slice
            .custom_colors
            .into_iter()
            .filter(|(_, value)| is_valid_hex_color(value))
            .collect();
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PaletteKey {
    dark: bool,
    user_mode: UserMode,
    custom_colors: BTreeMap<ColorToken, String>,
}

pub struct ThemeStore {
    store: Store<ThemeState>,
    persistence: Option<PersistenceAdapter>,
    palette_cache: Mutex<Option<(PaletteKey, Palette)>>,
}

impl ThemeStore {
    pub fn new() -> Self {
        Self {
            store: Store::new(STORE_ID, ThemeState::default()),
            persistence: None,
            palette_cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, adapter: PersistenceAdapter) -> Self {
        self.persistence = Some(adapter);
        self
    }

    pub fn snapshot(&self) -> ThemeState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ThemeState> {
        self.store.subscribe()
    }

    pub fn initial_state(&self) -> &ThemeState {
        self.store.initial_state()
    }

    pub fn theme_mode(&self) -> ThemeMode {
        self.store.with_state(|s| s.theme_mode)
    }

    pub fn admin_theme_enabled(&self) -> bool {
        self.store.with_state(ThemeState::admin_theme_enabled)
    }

    pub fn has_custom_theme(&self) -> bool {
        self.store.with_state(ThemeState::has_custom_theme)
    }

    pub fn set_error(&self, error: Option<String>) {
        self.store.set_error(error);
    }

    pub fn set_loading(&self, loading: bool) {
        self.store.set_loading(loading);
    }

    pub fn toggle_theme(&self) {
        self.store.update(|s| s.theme_mode = s.theme_mode.toggled());
        debug!(mode = ?self.theme_mode(), "theme toggled");
        self.persist_in_background();
    }

    pub fn set_theme_mode(&self, mode: ThemeMode) {
        self.store.update(|s| s.theme_mode = mode);
        self.persist_in_background();
    }

    pub fn set_user_mode(&self, mode: UserMode) {
        self.store.update(|s| s.user_mode = mode);
        self.persist_in_background();
    }

    /// Override one palette color. Values must be hex colors; anything else
    /// is reported through `error` and the overrides are left unchanged.
    pub fn set_custom_color(&self, token: ColorToken, value: &str) {
        let value = value.trim();
        if !is_valid_hex_color(value) {
            self.store
                .set_error(Some(format!("invalid color for {token}: {value}")));
            return;
        }
        let value = value.to_ascii_uppercase();
        self.store.update(|s| {
            s.custom_colors.insert(token, value);
            s.error = None;
        });
        self.persist_in_background();
    }

    pub fn clear_custom_colors(&self) {
        self.store.update(|s| s.custom_colors.clear());
        self.persist_in_background();
    }

    /// Base palette for the current mode with overrides applied. Memoized
    /// until the inputs change or the store is reset.
    pub fn resolved_palette(&self, system_prefers_dark: bool) -> Palette {
        let key = self.store.with_state(|s| PaletteKey {
            dark: s.is_dark(system_prefers_dark),
            user_mode: s.user_mode,
            custom_colors: s.custom_colors.clone(),
        });

        let mut cache = self
            .palette_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_key, palette)) = cache.as_ref() {
            if *cached_key == key {
                return palette.clone();
            }
        }

        let mut palette = if key.dark {
            Palette::dark()
        } else {
            Palette::light()
        };
        if key.user_mode == UserMode::Admin {
            palette = palette.with_admin_skin();
        }
        for (token, value) in &key.custom_colors {
            palette.colors.insert(*token, value.clone());
        }

        *cache = Some((key, palette.clone()));
        palette
    }

    #[cfg(test)]
    fn has_cached_palette(&self) -> bool {
        self.palette_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub async fn hydrate(&self) -> bool {
        match &self.persistence {
            Some(adapter) => self.store.hydrate(adapter).await,
            None => false,
        }
    }

    pub async fn flush(&self) -> bool {
        match &self.persistence {
            Some(adapter) => self.store.persist(adapter).await,
            None => false,
        }
    }

    fn persist_in_background(&self) {
        if let Some(adapter) = &self.persistence {
            self.store.persist_in_background(adapter);
        }
    }
}

impl Default for ThemeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagedStore for ThemeStore {
    fn id(&self) -> &'static str {
        STORE_ID
    }

    async fn reset(&self) {
        *self
            .palette_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.store.reset();
    }

    fn is_pristine(&self) -> bool {
        self.store.is_pristine()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
