//! Mode-specific search strategy.
//!
//! A pure mapping from the ball-search mode to the parameter bundle the
//! detector runs with. No state, no caching; the bundle is assembled from
//! the configuration on every call.

use crate::config::BallIdentification;

/// Ball search modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum SearchMode {
    /// Single stationary ball at rest before a shot.
    #[default]
    Placed,
    /// Multiple overlapping exposures from the monitor's own strobe.
    Strobed,
    /// Paired with an external strobe source.
    ExternallyStrobed,
    /// Short-range shots on the putting green.
    Putting,
}

/// The full parameter bundle for one detection run.
///
/// Radius bounds of -1 mean "unconstrained"; the facade derives working
/// bounds from the image size in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeParams {
    pub dp: f32,
    pub canny_lower: f32,
    pub canny_upper: f32,
    pub param1: f32,
    pub starting_param2: f32,
    pub min_param2: f32,
    pub max_param2: f32,
    pub param2_increment: f32,
    pub min_circles: usize,
    pub max_circles: usize,
    pub pre_canny_blur_size: i32,
    pub pre_hough_blur_size: i32,

    pub use_clahe: bool,
    pub clahe_clip_limit: i32,
    pub clahe_tiles_grid_size: i32,

    pub min_search_radius: i32,
    pub max_search_radius: i32,

    pub narrowing_min_ratio: f32,
    pub narrowing_max_ratio: f32,
    pub narrowing_starting_param2: f32,
    pub narrowing_dp: f32,
    pub narrowing_param1: f32,
    pub narrowing_param2: f32,
    pub narrowing_pre_canny_blur_size: i32,
    pub narrowing_pre_hough_blur_size: i32,

    pub use_dynamic_radii: bool,
    pub num_radii_to_average: usize,

    /// True when this bundle runs the alternative Hough algorithm.
    pub alt_algorithm: bool,
}

/// Assemble the parameter bundle for `mode`.
///
/// An unknown mode falls back to the placed-ball parameters.
pub fn mode_params(cfg: &BallIdentification, mode: SearchMode) -> ModeParams {
    match mode {
        SearchMode::Strobed => strobed_params(cfg),
        SearchMode::ExternallyStrobed => externally_strobed_params(cfg),
        SearchMode::Putting => putting_params(cfg),
        _ => placed_params(cfg),
    }
}

fn placed_params(cfg: &BallIdentification) -> ModeParams {
    let h = &cfg.placed_ball;
    let n = &cfg.narrowing;
    ModeParams {
        dp: h.dp,
        canny_lower: h.canny_lower,
        canny_upper: h.canny_upper,
        param1: h.param1,
        starting_param2: h.starting_param2,
        min_param2: h.min_param2,
        max_param2: h.max_param2,
        param2_increment: h.param2_increment,
        min_circles: h.min_circles,
        max_circles: h.max_circles,
        pre_canny_blur_size: h.pre_canny_blur_size,
        pre_hough_blur_size: h.pre_hough_blur_size,
        use_clahe: cfg.clahe.enable,
        clahe_clip_limit: cfg.clahe.clip_limit,
        clahe_tiles_grid_size: cfg.clahe.tiles_grid_size,
        min_search_radius: -1,
        max_search_radius: -1,
        narrowing_min_ratio: n.placed_min_ratio,
        narrowing_max_ratio: n.placed_max_ratio,
        narrowing_starting_param2: n.placed_starting_param2,
        narrowing_dp: n.placed_dp,
        narrowing_param1: n.placed_param1,
        narrowing_param2: 0.0,
        narrowing_pre_canny_blur_size: h.pre_canny_blur_size,
        narrowing_pre_hough_blur_size: h.pre_hough_blur_size,
        use_dynamic_radii: n.use_dynamic_radii,
        num_radii_to_average: n.num_radii_to_average,
        alt_algorithm: false,
    }
}

fn strobed_params(cfg: &BallIdentification) -> ModeParams {
    let use_alt = cfg.strobed_balls.use_alt_algorithm;
    let h = if use_alt {
        &cfg.strobed_balls.alt
    } else {
        &cfg.strobed_balls.primary
    };
    let n = &cfg.narrowing;
    ModeParams {
        dp: h.dp,
        canny_lower: h.canny_lower,
        canny_upper: h.canny_upper,
        param1: h.param1,
        starting_param2: h.starting_param2,
        min_param2: h.min_param2,
        max_param2: h.max_param2,
        param2_increment: h.param2_increment,
        min_circles: h.min_circles,
        max_circles: h.max_circles,
        pre_canny_blur_size: h.pre_canny_blur_size,
        pre_hough_blur_size: h.pre_hough_blur_size,
        use_clahe: cfg.clahe.enable,
        clahe_clip_limit: cfg.clahe.clip_limit,
        clahe_tiles_grid_size: cfg.clahe.tiles_grid_size,
        min_search_radius: -1,
        max_search_radius: -1,
        narrowing_min_ratio: n.strobed_min_ratio,
        narrowing_max_ratio: n.strobed_max_ratio,
        narrowing_starting_param2: 0.0,
        narrowing_dp: n.strobed_dp,
        narrowing_param1: n.placed_param1,
        narrowing_param2: n.strobed_param2,
        narrowing_pre_canny_blur_size: h.pre_canny_blur_size,
        narrowing_pre_hough_blur_size: h.pre_hough_blur_size,
        use_dynamic_radii: n.use_dynamic_radii,
        num_radii_to_average: n.num_radii_to_average,
        alt_algorithm: use_alt,
    }
}

fn externally_strobed_params(cfg: &BallIdentification) -> ModeParams {
    let ext = &cfg.externally_strobed;
    let h = &ext.hough;
    let n = &cfg.narrowing;
    ModeParams {
        dp: h.dp,
        canny_lower: h.canny_lower,
        canny_upper: h.canny_upper,
        param1: h.param1,
        starting_param2: h.starting_param2,
        min_param2: h.min_param2,
        max_param2: h.max_param2,
        param2_increment: h.param2_increment,
        min_circles: h.min_circles,
        max_circles: h.max_circles,
        pre_canny_blur_size: h.pre_canny_blur_size,
        pre_hough_blur_size: h.pre_hough_blur_size,
        use_clahe: ext.clahe.enable,
        clahe_clip_limit: ext.clahe.clip_limit,
        clahe_tiles_grid_size: ext.clahe.tiles_grid_size,
        min_search_radius: ext.min_search_radius,
        max_search_radius: ext.max_search_radius,
        narrowing_min_ratio: n.strobed_min_ratio,
        narrowing_max_ratio: n.strobed_max_ratio,
        narrowing_starting_param2: ext.narrowing_param2,
        narrowing_dp: ext.narrowing_dp,
        narrowing_param1: h.param1,
        narrowing_param2: ext.narrowing_param2,
        narrowing_pre_canny_blur_size: ext.narrowing_pre_canny_blur_size,
        narrowing_pre_hough_blur_size: ext.narrowing_pre_hough_blur_size,
        use_dynamic_radii: n.use_dynamic_radii,
        num_radii_to_average: n.num_radii_to_average,
        alt_algorithm: false,
    }
}

fn putting_params(cfg: &BallIdentification) -> ModeParams {
    let h = &cfg.putting;
    let n = &cfg.narrowing;
    ModeParams {
        dp: h.dp,
        canny_lower: h.canny_lower,
        canny_upper: h.canny_upper,
        param1: h.param1,
        starting_param2: h.starting_param2,
        min_param2: h.min_param2,
        max_param2: h.max_param2,
        param2_increment: h.param2_increment,
        min_circles: h.min_circles,
        max_circles: h.max_circles,
        pre_canny_blur_size: 0,
        pre_hough_blur_size: h.pre_hough_blur_size,
        use_clahe: cfg.clahe.enable,
        clahe_clip_limit: cfg.clahe.clip_limit,
        clahe_tiles_grid_size: cfg.clahe.tiles_grid_size,
        min_search_radius: -1,
        max_search_radius: -1,
        narrowing_min_ratio: n.placed_min_ratio,
        narrowing_max_ratio: n.placed_max_ratio,
        narrowing_starting_param2: n.placed_starting_param2,
        narrowing_dp: n.placed_dp,
        narrowing_param1: n.placed_param1,
        narrowing_param2: 0.0,
        narrowing_pre_canny_blur_size: 0,
        narrowing_pre_hough_blur_size: h.pre_hough_blur_size,
        use_dynamic_radii: n.use_dynamic_radii,
        num_radii_to_average: n.num_radii_to_average,
        alt_algorithm: false,
    }
}

/// True for modes that run the CLAHE/blur/Canny strobed preprocessing chain.
pub fn requires_preprocessing(mode: SearchMode) -> bool {
    matches!(mode, SearchMode::Strobed | SearchMode::ExternallyStrobed)
}

/// True iff `mode` is strobed and the alternative algorithm is selected.
pub fn use_alt_hough_algorithm(cfg: &BallIdentification, mode: SearchMode) -> bool {
    mode == SearchMode::Strobed && cfg.strobed_balls.use_alt_algorithm
}

/// Mode name for log messages.
pub fn mode_name(mode: SearchMode) -> &'static str {
    match mode {
        SearchMode::Placed => "Placed",
        SearchMode::Strobed => "Strobed",
        SearchMode::ExternallyStrobed => "ExternallyStrobed",
        SearchMode::Putting => "Putting",
    }
}
