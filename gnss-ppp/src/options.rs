//! Estimator parametrization
use nalgebra::Vector3;

/// PPP filter options, latched at construction
#[derive(Debug, Clone)]
pub struct PppOptions {
    pub rover_name: String,
    /// a priori rover position, enables NEU output and coordinate seeding
    pub xyz_apr_rover: Option<Vector3<f64>>,
    /// antenna eccentricity north / east / up [m]
    pub neu_ecc_rover: Vector3<f64>,
    /// receiver antenna name for the ANTEX lookup
    pub ant_name_rover: String,
    /// constellations taking part in the solution
    pub systems: Vec<char>,
    /// constellations contributing code observations
    pub code_lcs: Vec<char>,
    /// constellations contributing phase observations (ambiguities)
    pub amb_lcs: Vec<char>,
    /// smallest number of observations per epoch
    pub min_obs: usize,
    /// elevation mask [rad]
    pub min_ele: f64,
    /// a priori code sigma [m]
    pub sigma_c1: f64,
    /// a priori phase sigma [m]
    pub sigma_l1: f64,
    /// code residual acceptance scale [m]
    pub max_res_c1: f64,
    /// phase residual acceptance scale [m]
    pub max_res_l1: f64,
    /// initial coordinate sigma [m]
    pub apr_sig_crd: Vector3<f64>,
    /// coordinate white noise per epoch [m]
    pub noise_crd: Vector3<f64>,
    /// receiver clock reinitialization sigma [m]
    pub noise_clk: f64,
    /// initial wet troposphere sigma [m]
    pub apr_sig_trp: f64,
    /// troposphere random walk per epoch [m]
    pub noise_trp: f64,
    /// initial float ambiguity sigma [m]
    pub apr_sig_amb: f64,
    /// quick start: keep coordinates fixed for this long [s]
    pub seeding_time: f64,
    /// apply SSR orbit/clock corrections (PPP) or not (SPP)
    pub use_orb_clk_corr: bool,
}

impl Default for PppOptions {
    fn default() -> Self {
        Self {
            rover_name: "ROVER".to_string(),
            xyz_apr_rover: None,
            neu_ecc_rover: Vector3::zeros(),
            ant_name_rover: String::new(),
            systems: vec!['G', 'R', 'E', 'C'],
            code_lcs: vec!['G', 'R', 'E', 'C'],
            amb_lcs: vec!['G', 'R', 'E', 'C'],
            min_obs: 4,
            min_ele: 10.0f64.to_radians(),
            sigma_c1: 2.0,
            sigma_l1: 0.01,
            max_res_c1: 3.0,
            max_res_l1: 0.03,
            apr_sig_crd: Vector3::new(100.0, 100.0, 100.0),
            noise_crd: Vector3::new(100.0, 100.0, 100.0),
            noise_clk: 1000.0,
            apr_sig_trp: 0.1,
            noise_trp: 3.0e-6,
            apr_sig_amb: 1000.0,
            seeding_time: 0.0,
            use_orb_clk_corr: true,
        }
    }
}

impl PppOptions {
    pub fn use_system(&self, sys: char) -> bool {
        self.systems.contains(&sys)
    }
    pub fn use_code(&self, sys: char) -> bool {
        self.code_lcs.contains(&sys)
    }
    pub fn use_phase(&self, sys: char) -> bool {
        self.amb_lcs.contains(&sys)
    }
    /// Any system at all contributing phase
    pub fn any_phase(&self) -> bool {
        !self.amb_lcs.is_empty()
    }
    /// Code only configuration for a static single point solution
    pub fn code_only() -> Self {
        Self {
            amb_lcs: vec![],
            ..Default::default()
        }
    }
}
