use std::time::Duration;

use reqwest::{Client, Method};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// W3C element identifier key in wire responses.
pub(crate) const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0} browser is not supported")]
    UnsupportedBrowser(String),
    #[error("no such element: {0}")]
    NoSuchElement(String),
    #[error("timed out waiting for {0}")]
    WaitTimeout(String),
    #[error("webdriver error: {error}: {message}")]
    Wire { error: String, message: String },
    #[error("malformed webdriver response")]
    Malformed,
}

/// Handle to an element inside the remote session. Only valid together with
/// the driver that produced it.
#[derive(Debug, Clone)]
pub struct Element {
    id: String,
}

/// Client for a remote WebDriver server (geckodriver, chromedriver or a
/// Selenium hub) speaking the W3C wire protocol: plain JSON over HTTP.
#[derive(Clone)]
pub struct WebDriver {
    http: Client,
    base_url: String,
    session_id: String,
}

impl WebDriver {
    /// Opens a browser session against a WebDriver server on the local port.
    /// Only firefox and chrome are accepted; anything else fails before any
    /// request goes out. Remember to `quit` the session when done.
    pub async fn new(port: u16, browser: &str, args: &[String]) -> Result<Self, DriverError> {
        let base_url = format!("http://localhost:{port}/wd/hub");
        Self::connect(base_url, browser, args).await
    }

    pub(crate) async fn connect(
        base_url: String,
        browser: &str,
        args: &[String],
    ) -> Result<Self, DriverError> {
        let capabilities = capabilities(browser, args)?;
        let http = Client::builder().timeout(COMMAND_TIMEOUT).build()?;
        debug!(%base_url, browser, "creating webdriver session");

        let response = http
            .post(format!("{base_url}/session"))
            .json(&capabilities)
            .send()
            .await?;
        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(wire_error(&payload));
        }

        // geckodriver/chromedriver nest the id under "value"; older Selenium
        // hubs put it at the top level
        let session_id = payload["value"]["sessionId"]
            .as_str()
            .or_else(|| payload["sessionId"].as_str())
            .ok_or(DriverError::Malformed)?
            .to_string();

        Ok(Self {
            http,
            base_url,
            session_id,
        })
    }

    pub async fn goto(&self, url: &str) -> Result<(), DriverError> {
        debug!(%url, "navigating");
        self.cmd(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    pub async fn find(&self, css: &str) -> Result<Element, DriverError> {
        let payload = self
            .element_cmd("/element", css)
            .await
            .map_err(|err| not_found(err, css))?;
        element_from(&payload["value"]).ok_or(DriverError::Malformed)
    }

    pub async fn find_all(&self, css: &str) -> Result<Vec<Element>, DriverError> {
        let payload = self.element_cmd("/elements", css).await?;
        let items = payload["value"].as_array().ok_or(DriverError::Malformed)?;
        items
            .iter()
            .map(|item| element_from(item).ok_or(DriverError::Malformed))
            .collect()
    }

    /// Finds a child of `element`, scoped the same way the session-level
    /// `find` is.
    pub async fn find_from(&self, element: &Element, css: &str) -> Result<Element, DriverError> {
        let path = format!("/element/{}/element", element.id);
        let payload = self
            .element_cmd(&path, css)
            .await
            .map_err(|err| not_found(err, css))?;
        element_from(&payload["value"]).ok_or(DriverError::Malformed)
    }

    /// Like `find`, but absence is a regular outcome instead of an error.
    /// Used for optional UI such as onboarding and tips dialogs.
    pub async fn try_find(&self, css: &str) -> Result<Option<Element>, DriverError> {
        match self.find(css).await {
            Ok(element) => Ok(Some(element)),
            Err(DriverError::NoSuchElement(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Polls for an element until it shows up or the timeout elapses.
    pub async fn wait_for(&self, css: &str, timeout: Duration) -> Result<Element, DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(element) = self.try_find(css).await? {
                return Ok(element);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::WaitTimeout(css.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Polls until the element disappears. Returns false when it is still
    /// present at the deadline; callers decide whether that is an error.
    pub async fn wait_gone(&self, css: &str, timeout: Duration) -> Result<bool, DriverError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_find(css).await?.is_none() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn click(&self, element: &Element) -> Result<(), DriverError> {
        let path = format!("/element/{}/click", element.id);
        self.cmd(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    pub async fn clear(&self, element: &Element) -> Result<(), DriverError> {
        let path = format!("/element/{}/clear", element.id);
        self.cmd(Method::POST, &path, Some(json!({}))).await?;
        Ok(())
    }

    pub async fn send_keys(&self, element: &Element, text: &str) -> Result<(), DriverError> {
        let path = format!("/element/{}/value", element.id);
        let body = json!({
            "text": text,
            "value": text.chars().map(String::from).collect::<Vec<_>>(),
        });
        self.cmd(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    pub async fn text(&self, element: &Element) -> Result<String, DriverError> {
        let path = format!("/element/{}/text", element.id);
        let payload = self.cmd(Method::GET, &path, None).await?;
        payload["value"]
            .as_str()
            .map(str::to_string)
            .ok_or(DriverError::Malformed)
    }

    pub async fn attr(&self, element: &Element, name: &str) -> Result<Option<String>, DriverError> {
        let path = format!("/element/{}/attribute/{name}", element.id);
        let payload = self.cmd(Method::GET, &path, None).await?;
        Ok(payload["value"].as_str().map(str::to_string))
    }

    /// Reads a live DOM property. Unlike `attr` this reflects values typed
    /// into inputs and textareas.
    pub async fn prop(&self, element: &Element, name: &str) -> Result<Option<String>, DriverError> {
        let path = format!("/element/{}/property/{name}", element.id);
        let payload = self.cmd(Method::GET, &path, None).await?;
        Ok(payload["value"].as_str().map(str::to_string))
    }

    /// Ends the session and closes the browser.
    pub async fn quit(&self) -> Result<(), DriverError> {
        debug!("quitting webdriver session");
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        self.http.delete(url).send().await?;
        Ok(())
    }

    async fn element_cmd(&self, path: &str, css: &str) -> Result<Value, DriverError> {
        let body = json!({ "using": "css selector", "value": css });
        self.cmd(Method::POST, path, Some(body)).await
    }

    async fn cmd(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{path}", self.base_url, self.session_id);
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        // some commands answer with an empty body
        let text = response.text().await?;
        let payload: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(wire_error(&payload));
        }
        Ok(payload)
    }
}

fn capabilities(browser: &str, args: &[String]) -> Result<Value, DriverError> {
    let caps = match browser {
        "firefox" => json!({
            "browserName": "firefox",
            "moz:firefoxOptions": { "args": args },
        }),
        "chrome" => json!({
            "browserName": "chrome",
            "goog:chromeOptions": { "args": args },
        }),
        other => return Err(DriverError::UnsupportedBrowser(other.to_string())),
    };
    Ok(json!({
        "capabilities": { "alwaysMatch": caps },
        "desiredCapabilities": caps,
    }))
}

fn wire_error(payload: &Value) -> DriverError {
    let error = payload["value"]["error"]
        .as_str()
        .unwrap_or("unknown error")
        .to_string();
    let message = payload["value"]["message"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    DriverError::Wire { error, message }
}

fn not_found(err: DriverError, css: &str) -> DriverError {
    match err {
        DriverError::Wire { ref error, .. } if error == "no such element" => {
            DriverError::NoSuchElement(css.to_string())
        }
        other => other,
    }
}

fn element_from(value: &Value) -> Option<Element> {
    let id = value
        .get(ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)?;
    Some(Element { id: id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mock_session(server: &MockServer) -> WebDriver {
        Mock::given(method("POST"))
            .and(path("/wd/hub/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "abc", "capabilities": {} }
            })))
            .mount(server)
            .await;
        WebDriver::connect(format!("{}/wd/hub", server.uri()), "firefox", &[])
            .await
            .unwrap()
    }

    #[test]
    fn unsupported_browser_is_a_configuration_error() {
        let err = capabilities("safari", &[]).unwrap_err();
        assert!(matches!(err, DriverError::UnsupportedBrowser(name) if name == "safari"));
    }

    #[test]
    fn firefox_capabilities_carry_launch_args() {
        let caps = capabilities("firefox", &["-headless".to_string()]).unwrap();
        assert_eq!(
            caps["capabilities"]["alwaysMatch"]["moz:firefoxOptions"]["args"][0],
            "-headless"
        );
        assert_eq!(caps["desiredCapabilities"]["browserName"], "firefox");
    }

    #[test]
    fn element_ids_parse_both_wire_dialects() {
        let w3c = json!({ ELEMENT_KEY: "e1" });
        assert_eq!(element_from(&w3c).unwrap().id, "e1");
        let legacy = json!({ "ELEMENT": "e2" });
        assert_eq!(element_from(&legacy).unwrap().id, "e2");
        assert!(element_from(&json!({})).is_none());
    }

    #[tokio::test]
    async fn session_is_created_and_commands_target_it() {
        let server = MockServer::start().await;
        let driver = mock_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/wd/hub/session/abc/url"))
            .and(body_partial_json(json!({"url": "https://example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .mount(&server)
            .await;

        driver.goto("https://example.com").await.unwrap();
    }

    #[tokio::test]
    async fn missing_elements_map_to_no_such_element() {
        let server = MockServer::start().await;
        let driver = mock_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/wd/hub/session/abc/element"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": { "error": "no such element", "message": "nope" }
            })))
            .mount(&server)
            .await;

        let err = driver.find(".missing").await.unwrap_err();
        assert!(matches!(err, DriverError::NoSuchElement(css) if css == ".missing"));
        assert!(driver.try_find(".missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wait_for_times_out_when_element_never_appears() {
        let server = MockServer::start().await;
        let driver = mock_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/wd/hub/session/abc/element"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": { "error": "no such element", "message": "nope" }
            })))
            .mount(&server)
            .await;

        let err = driver
            .wait_for(".missing", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::WaitTimeout(_)));

        // gone-waiting on the same selector succeeds immediately
        assert!(driver
            .wait_gone(".missing", Duration::from_millis(300))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn element_property_reads_live_values() {
        let server = MockServer::start().await;
        let driver = mock_session(&server).await;

        Mock::given(method("GET"))
            .and(path("/wd/hub/session/abc/element/e1/property/value"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": "draft"})))
            .mount(&server)
            .await;

        let element = element_from(&json!({ ELEMENT_KEY: "e1" })).unwrap();
        let value = driver.prop(&element, "value").await.unwrap();
        assert_eq!(value.as_deref(), Some("draft"));
    }

    #[tokio::test]
    async fn send_keys_spells_out_characters() {
        let server = MockServer::start().await;
        let driver = mock_session(&server).await;

        Mock::given(method("POST"))
            .and(path("/wd/hub/session/abc/element/e1/value"))
            .and(body_partial_json(json!({
                "text": "hi",
                "value": ["h", "i"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": null})))
            .mount(&server)
            .await;

        let element = element_from(&json!({ ELEMENT_KEY: "e1" })).unwrap();
        driver.send_keys(&element, "hi").await.unwrap();
    }
}
