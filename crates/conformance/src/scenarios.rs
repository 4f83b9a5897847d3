//! The httpbin scenario battery.
//!
//! Every scenario drives one [`ClientSession`] through a fixed sequence of
//! requests and checks the status of each. Scenarios share nothing but the
//! read-only configuration behind the session.

use derive_more::From;
use http::StatusCode;

use crate::body::form_urlencoded;
use crate::errors::SessionError;
use crate::session::{ClientSession, ACCEPT_HTML};

pub const POST_CONTENT: &str = "Content to post";
pub const LARGE_POST_REPEAT: usize = 1024 * 100;
pub const BASE64_PATH: &str = "/base64/SFRUUEJJTiBpcyBhd2Vzb21l";
pub const BASE64_DECODED: &[u8] = b"HTTPBIN is awesome";

const CHUNKED: &str = "Transfer-Encoding: chunked";
const EXPECT_CONTINUE: &str = "Expect: 100-continue";
const NO_EXPECT: &str = "Expect:";

/// Why a scenario failed.
#[derive(Debug, From)]
pub enum ScenarioFailure {
    #[from(ignore)]
    StatusMismatch {
        request: String,
        expected: StatusCode,
        actual: StatusCode,
    },

    #[from(ignore)]
    BodyMismatch {
        request: String,
        expected: String,
        actual: String,
    },

    #[from]
    Session(SessionError),
}

impl std::error::Error for ScenarioFailure {}

impl core::fmt::Display for ScenarioFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatusMismatch {
                request,
                expected,
                actual,
            } => write!(f, "{request}: expected status {expected}, got {actual}"),
            Self::BodyMismatch {
                request,
                expected,
                actual,
            } => write!(f, "{request}: expected body {expected:?}, got {actual:?}"),
            Self::Session(err) => write!(f, "{err}"),
        }
    }
}

pub type ScenarioResult = std::result::Result<(), ScenarioFailure>;

/// A named scenario.
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub run: fn(&mut ClientSession) -> ScenarioResult,
}

impl core::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish()
    }
}

/// The battery, in run order.
pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "simple_get",
        run: simple_get,
    },
    Scenario {
        name: "get_delay",
        run: get_delay,
    },
    Scenario {
        name: "get_chunked_small",
        run: get_chunked_small,
    },
    Scenario {
        name: "get_chunked_large",
        run: get_chunked_large,
    },
    Scenario {
        name: "base64_decode",
        run: base64_decode,
    },
    Scenario {
        name: "basic_auth_get",
        run: basic_auth_get,
    },
    Scenario {
        name: "post_small",
        run: post_small,
    },
    Scenario {
        name: "post_small_chunked",
        run: post_small_chunked,
    },
    Scenario {
        name: "post_large",
        run: post_large,
    },
    Scenario {
        name: "post_large_chunked",
        run: post_large_chunked,
    },
    Scenario {
        name: "put_file",
        run: put_file,
    },
    Scenario {
        name: "put_file_delay",
        run: put_file_delay,
    },
    Scenario {
        name: "put_file_chunked",
        run: put_file_chunked,
    },
];

#[must_use]
pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|scenario| scenario.name == name)
}

/// Performs the session's current request and checks its status.
///
/// # Errors
///
/// A transport failure or a status other than `expected`.
pub fn expect_status(session: &mut ClientSession, expected: StatusCode) -> ScenarioResult {
    let actual = session.perform()?;
    if actual == expected {
        return Ok(());
    }

    Err(ScenarioFailure::StatusMismatch {
        request: session.describe(),
        expected,
        actual,
    })
}

/// The `data=` form posted by the large scenarios.
#[must_use]
pub fn large_form() -> bytes::Bytes {
    form_urlencoded([("data", POST_CONTENT.repeat(LARGE_POST_REPEAT).as_str())])
}

fn basic_authorization(user: &str, password: &str) -> String {
    use base64::Engine;

    let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Authorization: Basic {token}")
}

fn simple_get(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/get")?;
    expect_status(session, StatusCode::OK)
}

fn get_delay(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/delay/1")?;
    expect_status(session, StatusCode::OK)
}

fn get_chunked_small(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/stream/1")?;
    expect_status(session, StatusCode::OK)?;

    session.set_url_and_request_target("/stream/4")?;
    expect_status(session, StatusCode::OK)
}

fn get_chunked_large(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/stream/100")?;
    expect_status(session, StatusCode::OK)
}

fn base64_decode(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target(BASE64_PATH)?;
    session.set_headers([ACCEPT_HTML])?;
    expect_status(session, StatusCode::OK)?;

    let actual = session.response_body();
    if actual == BASE64_DECODED {
        return Ok(());
    }

    Err(ScenarioFailure::BodyMismatch {
        request: session.describe(),
        expected: String::from_utf8_lossy(BASE64_DECODED).into_owned(),
        actual: String::from_utf8_lossy(actual).into_owned(),
    })
}

fn basic_auth_get(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/basic-auth/name/pass")?;
    expect_status(session, StatusCode::UNAUTHORIZED)?;

    if session.config().no_auth() {
        ewe_trace::info!("Skipping authenticated basic-auth requests");
        return Ok(());
    }

    session.set_headers([basic_authorization("name", "pass")])?;
    expect_status(session, StatusCode::OK)?;

    session.set_headers([basic_authorization("name", "pas")])?;
    expect_status(session, StatusCode::UNAUTHORIZED)
}

fn post_small(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/post")?;
    session.set_post_fields(POST_CONTENT);
    expect_status(session, StatusCode::OK)?;

    session.set_headers([EXPECT_CONTINUE])?;
    expect_status(session, StatusCode::OK)
}

fn post_small_chunked(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/post")?;
    session.set_post_fields(POST_CONTENT);
    session.set_headers([CHUNKED])?;
    expect_status(session, StatusCode::OK)?;

    session.set_headers([EXPECT_CONTINUE])?;
    expect_status(session, StatusCode::OK)
}

fn post_large(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/post")?;
    session.set_post_fields(large_form());
    expect_status(session, StatusCode::OK)?;

    session.set_headers([NO_EXPECT])?;
    expect_status(session, StatusCode::OK)
}

fn post_large_chunked(session: &mut ClientSession) -> ScenarioResult {
    session.set_url_and_request_target("/post")?;
    session.set_post_fields(large_form());
    session.set_headers([CHUNKED])?;
    expect_status(session, StatusCode::OK)?;

    session.set_headers([CHUNKED, NO_EXPECT])?;
    expect_status(session, StatusCode::OK)
}

fn put_file(session: &mut ClientSession) -> ScenarioResult {
    upload_to(session, "/put", &[])
}

fn put_file_delay(session: &mut ClientSession) -> ScenarioResult {
    upload_to(session, "/delay/1", &[])
}

fn put_file_chunked(session: &mut ClientSession) -> ScenarioResult {
    upload_to(session, "/put", &[CHUNKED])
}

fn upload_to(session: &mut ClientSession, path: &str, headers: &[&str]) -> ScenarioResult {
    let upload = session.config().upload_file().to_path_buf();

    session.set_url_and_request_target(path)?;
    session.set_upload_file(upload);
    if !headers.is_empty() {
        session.set_headers(headers)?;
    }
    expect_status(session, StatusCode::OK)
}
