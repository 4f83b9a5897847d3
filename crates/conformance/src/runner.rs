//! Maps the scenario battery onto `libtest-mimic` trials.

use std::sync::Arc;

use libtest_mimic::{Arguments, Conclusion, Failed, Trial};

use crate::config::HarnessConfig;
use crate::scenarios::{Scenario, SCENARIOS};
use crate::session::ClientSession;

/// Parses the runner's own arguments. Trials always run on one thread: the
/// battery is strictly sequential.
#[must_use]
pub fn arguments<I, S>(program: &str, rest: I) -> Arguments
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let argv = std::iter::once(program.to_string()).chain(rest.into_iter().map(Into::into));

    let mut args = Arguments::from_iter(argv);
    args.test_threads = Some(1);
    args
}

#[must_use]
pub fn trials(config: &Arc<HarnessConfig>) -> Vec<Trial> {
    SCENARIOS
        .iter()
        .map(|scenario| {
            let config = Arc::clone(config);
            let scenario = *scenario;
            Trial::test(scenario.name, move || run_scenario(config, scenario))
        })
        .collect()
}

/// Runs one scenario on a session of its own. The session is dropped on
/// return, whether the scenario passed or not.
///
/// # Errors
///
/// The scenario's failure, rendered for the report.
pub fn run_scenario(config: Arc<HarnessConfig>, scenario: Scenario) -> Result<(), Failed> {
    ewe_trace::info!("Running scenario {}", scenario.name);

    let mut session = ClientSession::open(config).map_err(|err| Failed::from(err.to_string()))?;

    (scenario.run)(&mut session).map_err(|failure| {
        ewe_trace::warn!("Scenario {} failed: {}", scenario.name, failure);
        Failed::from(failure.to_string())
    })
}

/// Runs the battery, filtered and reported according to `args`.
#[must_use]
pub fn run(config: &Arc<HarnessConfig>, args: &Arguments) -> Conclusion {
    libtest_mimic::run(args, trials(config))
}
