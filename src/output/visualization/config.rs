//! Plot configuration shared by the source and trace plots

use plotters::prelude::*;

/// Size, labels and styling of a curve plot
///
/// Source plots put τ on the x axis, log10 by default, with one curve per
/// wavenumber or trace column.
///
/// ```rust,ignore
/// use perturb_rs::output::visualization::PlotConfig;
/// use plotters::prelude::*;
///
/// let mut config = PlotConfig::source_evolution("Temperature source");
/// config.series_colors = Some(vec![RED, BLUE, GREEN]);
/// config.log_tau = false;
/// ```
#[derive(Clone)]
pub struct PlotConfig {
    /// Pixels (1024)
    pub width: u32,

    /// Pixels (768)
    pub height: u32,

    pub title: String,

    pub xlabel: String,

    pub ylabel: String,

    /// Curve colors in order; curves past the end use the built-in palette
    pub series_colors: Option<Vec<RGBColor>>,

    pub background: RGBColor,

    /// Stroke width of every curve in pixels (2)
    pub line_width: u32,

    pub show_grid: bool,

    /// Plot against log10(τ) (true)
    pub log_tau: bool,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: "Perturbations".to_string(),
            xlabel: String::new(),
            ylabel: String::new(),
            series_colors: None,
            background: WHITE,
            line_width: 2,
            show_grid: true,
            log_tau: true,
        }
    }
}

/// Title argument of the config constructors: a string, or `None` for the default
pub trait IntoOptionalTitle {
    fn into_optional_title(self) -> Option<String>;
}

impl IntoOptionalTitle for &str {
    fn into_optional_title(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl IntoOptionalTitle for String {
    fn into_optional_title(self) -> Option<String> {
        Some(self)
    }
}

impl<T: IntoOptionalTitle> IntoOptionalTitle for Option<T> {
    fn into_optional_title(self) -> Option<String> {
        self.and_then(|t| t.into_optional_title())
    }
}

/// Keep the default title of the plot kind
pub const NO_TITLE: Option<&str> = None;

impl PlotConfig {
    /// Config for S(τ) curves at fixed k
    ///
    /// ```rust,ignore
    /// let config = PlotConfig::source_evolution("t0 at three wavenumbers");
    /// let config = PlotConfig::source_evolution(NO_TITLE);
    /// ```
    pub fn source_evolution(title: impl IntoOptionalTitle) -> Self {
        let mut config = Self::default();
        config.xlabel = "tau (Mpc)".to_string();
        config.ylabel = "S(k, tau)".to_string();
        config.title = title
            .into_optional_title()
            .unwrap_or_else(|| "Source Evolution".to_string());
        config
    }

    /// Config for per-step trace columns
    pub fn trace(title: impl IntoOptionalTitle) -> Self {
        let mut config = Self::default();
        config.xlabel = "tau (Mpc)".to_string();
        config.title = title
            .into_optional_title()
            .unwrap_or_else(|| "Perturbation Trace".to_string());
        config
    }

    /// Config with custom curve colors
    pub fn with_colors(colors: Vec<RGBColor>) -> Self {
        let mut config = Self::default();
        config.series_colors = Some(colors);
        config
    }

    /// Color of curve `index`
    pub(crate) fn series_color(&self, index: usize) -> RGBColor {
        if let Some(colors) = &self.series_colors
            && index < colors.len()
        {
            return colors[index];
        }

        let default_colors = [
            RED,
            BLUE,
            GREEN,
            MAGENTA,
            CYAN,
            BLACK,
            RGBColor(255, 165, 0),  // Orange
            RGBColor(128, 0, 128),   // Purple
            RGBColor(255, 192, 203), // Pink
            RGBColor(165, 42, 42),   // Brown
        ];

        default_colors[index % default_colors.len()]
    }
}

// =================================================================================================
// Tests
// =================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_config_default() {
        let config = PlotConfig::default();
        assert_eq!(config.width, 1024);
        assert_eq!(config.height, 768);
        assert!(config.show_grid);
        assert!(config.log_tau);
    }

    #[test]
    fn test_source_evolution_titles() {
        assert_eq!(PlotConfig::source_evolution(NO_TITLE).title, "Source Evolution");
        let config = PlotConfig::source_evolution(format!("k = {}", 0.05));
        assert_eq!(config.title, "k = 0.05");
        assert_eq!(config.xlabel, "tau (Mpc)");
    }

    #[test]
    fn test_trace_title() {
        assert_eq!(PlotConfig::trace(NO_TITLE).title, "Perturbation Trace");
        assert_eq!(PlotConfig::trace("delta_g").title, "delta_g");
    }

    #[test]
    fn test_series_color_palette() {
        let config = PlotConfig::default();
        assert_eq!(config.series_color(0), RED);
        assert_eq!(config.series_color(1), BLUE);
        assert_eq!(config.series_color(10), RED);

        let custom = PlotConfig::with_colors(vec![GREEN]);
        assert_eq!(custom.series_color(0), GREEN);
        assert_eq!(custom.series_color(1), BLUE);
    }
}
