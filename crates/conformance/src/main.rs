use std::sync::Arc;

use ewe_conformance::types::Result;
use ewe_conformance::{config, runner, HarnessSettings};
use libtest_mimic::Conclusion;

fn main() {
    match start() {
        Ok(conclusion) => conclusion.exit(),
        Err(err) => {
            eprintln!("ewe_conformance: {err}");
            std::process::exit(1);
        }
    }
}

fn start() -> Result<Conclusion> {
    let (own, rest) = config::split_args(&config::command(), std::env::args());
    let matches = config::command().get_matches_from(own);
    let settings = HarnessSettings::resolve(&matches)?;

    // Logging comes up before trust roots load so their events are kept.
    if let Err(err) = ewe_trace::init_stderr_subscriber(settings.log_level()?) {
        eprintln!("ewe_conformance: logging disabled: {err}");
    }

    let harness = Arc::new(settings.into_config()?);
    match harness.proxy().endpoint() {
        Some(proxy) => ewe_trace::info!(
            "Running against {} through {}://{} in {} mode",
            harness.site(),
            proxy.scheme(),
            proxy.authority(),
            harness.proxy().name()
        ),
        None => ewe_trace::info!("Running against {} directly", harness.site()),
    }

    let args = runner::arguments("ewe_conformance", rest);
    Ok(runner::run(&harness, &args))
}
