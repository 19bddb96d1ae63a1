use streamloader_core::config::LoaderConfig;
use streamloader_core::scheme::transform_url_scheme_with;

/// Print `url` with its scheme marker toggled.
pub fn run_scheme(cfg: &LoaderConfig, url: &str) {
    println!("{}", transform_url_scheme_with(url, &cfg.scheme_prefix));
}
