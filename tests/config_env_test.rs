//! Environment overrides live in their own test binary so the variables
//! cannot leak into other config tests running in parallel.

use std::env;

use functree::config::Settings;

#[test]
fn given_env_vars_when_loading_then_they_override_files() {
    env::set_var("FUNCTREE__EVENTS__LOG_ROUTES", "true");
    env::set_var("FUNCTREE__PROPERTIES__NOTIFY_UNCHANGED", "false");

    let settings = Settings::load(None).expect("load settings");

    env::remove_var("FUNCTREE__EVENTS__LOG_ROUTES");
    env::remove_var("FUNCTREE__PROPERTIES__NOTIFY_UNCHANGED");
    assert!(settings.events.log_routes);
    assert!(!settings.properties.notify_unchanged);
}
