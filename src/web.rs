use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::driver::{DriverError, Element, WebDriver, POLL_INTERVAL};

// Selector tables for the service's web UI. These are presentation data tied
// to the deployed markup, kept verbatim so a UI change is a one-line fix.

// login page
const EMAIL_INPUT: &str = r#"input[name*="email"]"#;
const PASSWORD_INPUT: &str = r#"input[name*="password"]"#;
const PHONE_INPUT: &str = r#"input[name*="phone"]"#;
const PHONE_LOGIN_LINK: &str = "a";
const SUBMIT_BUTTON: &str = r#"div[class*="btn-main"]"#;
const LEGACY_BROWSER_CONTINUE: &str = ".btn-nofiled-blue";

// home page and library
const WELCOME_CONTINUE_BUTTON: &str = ".btn-main";
const TIPS_SKIP_BUTTON: &str =
    r#"div[data-xpath="portal"] > div:nth-child(1) > div:nth-child(1) > div:nth-child(4) > div:nth-child(1)"#;
const COMMUNITY_BUTTON: &str = "div > a:nth-child(1)";
const PLUS_BUTTON: &str = r#"div[data-onboarding="mainArea"] > div:nth-child(1) > div:nth-child(3)"#;
const CREATE_IN_LIBRARY_BUTTON: &str = r#"div[data-onboarding="mainArea"] > div:nth-child(2) > div:nth-child(2) > div:nth-child(1) > div:nth-child(3) > div:nth-child(1)"#;
const NOTE_BUTTON: &str = "div.context_item:nth-child(1)";
const NOTE_TITLE_INPUT: &str = ".clear-input";

// people panel
const PEOPLE_BUTTON: &str =
    "nav > div > div:nth-child(1) > div:nth-child(1) > div:nth-child(1) > a:nth-child(4)";
const PEOPLE_LIST: &str =
    "nav > div > div:nth-child(2) > div:nth-child(2) > div:nth-child(3) > div:nth-child(1) > div";
const TOP_CONTACT: &str =
    "nav > div > div:nth-child(2) > div:nth-child(2) > div:nth-child(1) > div:nth-child(1) > div:nth-child(2)";
const TOP_CONTACT_FULLNAME: &str = "div:nth-child(1) > div:nth-child(1)";
const TOP_CONTACT_USERNAME: &str = "div:nth-child(2)";
const CONTACT_FULLNAME: &str = "div:nth-child(2) > div:nth-child(1) > div:nth-child(1)";
const CONTACT_USERNAME: &str = "div:nth-child(2) > div:nth-child(2)";
const MESSAGE_AREA: &str = r#"textarea[placeholder="Message"]"#;
const SEND_BUTTON: &str = r#"button[title*="Send"]"#;

#[cfg(not(test))]
const PAGE_WAIT: Duration = Duration::from_secs(10);
#[cfg(not(test))]
const STEP_WAIT: Duration = Duration::from_secs(5);

// short budgets keep the failure-path tests from sitting out full waits
#[cfg(test)]
const PAGE_WAIT: Duration = Duration::from_millis(400);
#[cfg(test)]
const STEP_WAIT: Duration = Duration::from_millis(400);

#[derive(Debug, Error)]
pub enum WebError {
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("invalid email")]
    InvalidEmail,
    #[error("invalid phone")]
    InvalidPhone,
    #[error("invalid password")]
    InvalidPassword,
    #[error("user not found")]
    UserNotFound,
}

/// Message recipient looked up in the people panel, either by exact display
/// name or by username. Matching is case-sensitive.
#[derive(Debug, Clone)]
pub enum Recipient {
    FullName(String),
    Username(String),
}

impl Recipient {
    /// Full name takes precedence when both are given, matching the original
    /// tool's flag handling.
    pub fn new(fullname: &str, username: &str) -> Option<Self> {
        if !fullname.is_empty() {
            Some(Recipient::FullName(fullname.to_string()))
        } else if !username.is_empty() {
            Some(Recipient::Username(username.to_string()))
        } else {
            None
        }
    }

    /// Compares a contact label from the UI against the recipient. Username
    /// labels render with a leading "@" which is not part of the username.
    fn matches(&self, label: &str) -> bool {
        match self {
            Recipient::FullName(name) => label == name,
            Recipient::Username(name) => label.strip_prefix('@').unwrap_or(label) == name,
        }
    }
}

/// Web-transport login with an email identifier. Success is detected by the
/// password form going away after submit.
pub async fn login_by_email(
    wd: &WebDriver,
    email: &str,
    password: &str,
) -> Result<(), WebError> {
    open_login_page(wd).await?;
    let input = wd.wait_for(EMAIL_INPUT, PAGE_WAIT).await?;
    wd.send_keys(&input, email).await?;
    submit(wd).await?;
    finish_login(wd, password, WebError::InvalidEmail).await
}

/// Web-transport login with a phone identifier. Switches the form to the
/// "by phone number" mode first and strips a leading "+" from the number,
/// since the field carries its own country-code prefix.
pub async fn login_by_phone(
    wd: &WebDriver,
    phone: &str,
    password: &str,
) -> Result<(), WebError> {
    open_login_page(wd).await?;
    let link = wd.wait_for(PHONE_LOGIN_LINK, PAGE_WAIT).await?;
    wd.click(&link).await?;

    let input = wd.wait_for(PHONE_INPUT, PAGE_WAIT).await?;
    wd.clear(&input).await?;
    let digits = match phone.find('+') {
        Some(i) => &phone[i + 1..],
        None => phone,
    };
    wd.send_keys(&input, digits).await?;
    submit(wd).await?;
    finish_login(wd, password, WebError::InvalidPhone).await
}

/// Sends a chat message through the people panel: the top-contact shortcut is
/// checked first, then the contact list is scanned linearly.
pub async fn send_message(
    wd: &WebDriver,
    recipient: &Recipient,
    text: &str,
) -> Result<(), WebError> {
    open_home_page(wd).await?;
    let people = wd.wait_for(PEOPLE_BUTTON, PAGE_WAIT).await?;
    wd.click(&people).await?;
    wd.wait_for(PEOPLE_LIST, PAGE_WAIT).await?;
    dismiss_tips(wd).await?;

    if let Some(top) = wd.try_find(TOP_CONTACT).await? {
        let selector = match recipient {
            Recipient::FullName(_) => TOP_CONTACT_FULLNAME,
            Recipient::Username(_) => TOP_CONTACT_USERNAME,
        };
        let label = wd.text(&wd.find_from(&top, selector).await?).await?;
        if recipient.matches(&label) {
            debug!(%label, "matched top contact");
            return compose(wd, &top, text).await;
        }
    }

    for entry in wd.find_all(PEOPLE_LIST).await? {
        let selector = match recipient {
            Recipient::FullName(_) => CONTACT_FULLNAME,
            Recipient::Username(_) => CONTACT_USERNAME,
        };
        let label = wd.text(&wd.find_from(&entry, selector).await?).await?;
        if recipient.matches(&label) {
            debug!(%label, "matched contact in list");
            return compose(wd, &entry, text).await;
        }
    }

    Err(WebError::UserNotFound)
}

/// Creates a blank note in the library through the plus-button menu and
/// fills its title.
pub async fn create_textpad(wd: &WebDriver, title: &str) -> Result<(), WebError> {
    open_home_page(wd).await?;
    let community = wd.wait_for(COMMUNITY_BUTTON, PAGE_WAIT).await?;
    wd.click(&community).await?;
    let plus = wd.wait_for(PLUS_BUTTON, PAGE_WAIT).await?;
    dismiss_tips(wd).await?;

    wd.click(&plus).await?;
    let create = wd.wait_for(CREATE_IN_LIBRARY_BUTTON, STEP_WAIT).await?;
    wd.click(&create).await?;
    let note = wd.wait_for(NOTE_BUTTON, STEP_WAIT).await?;
    wd.click(&note).await?;

    let title_input = wd.wait_for(NOTE_TITLE_INPUT, PAGE_WAIT).await?;
    wd.clear(&title_input).await?;
    wd.send_keys(&title_input, title).await?;

    // clicking away from the input is what persists the title; the create
    // menu reopening confirms the click was processed
    let plus = wd.find(PLUS_BUTTON).await?;
    wd.click(&plus).await?;
    wd.wait_for(CREATE_IN_LIBRARY_BUTTON, STEP_WAIT).await?;
    Ok(())
}

async fn open_login_page(wd: &WebDriver) -> Result<(), WebError> {
    wd.goto(crate::config::login_url().as_str()).await?;
    // an interstitial shows up for browsers the service considers outdated
    if let Some(button) = wd.try_find(LEGACY_BROWSER_CONTINUE).await? {
        wd.click(&button).await?;
    }
    Ok(())
}

async fn open_home_page(wd: &WebDriver) -> Result<(), WebError> {
    wd.goto(crate::config::home_url().as_str()).await?;
    if let Some(button) = wd.try_find(WELCOME_CONTINUE_BUTTON).await? {
        wd.click(&button).await?;
    }
    Ok(())
}

async fn dismiss_tips(wd: &WebDriver) -> Result<(), WebError> {
    if let Some(button) = wd.try_find(TIPS_SKIP_BUTTON).await? {
        wd.click(&button).await?;
        wd.wait_gone(TIPS_SKIP_BUTTON, STEP_WAIT).await?;
    }
    Ok(())
}

async fn submit(wd: &WebDriver) -> Result<(), WebError> {
    let button = wd.wait_for(SUBMIT_BUTTON, STEP_WAIT).await?;
    wd.click(&button).await?;
    Ok(())
}

async fn finish_login(
    wd: &WebDriver,
    password: &str,
    invalid_identifier: WebError,
) -> Result<(), WebError> {
    let password_input = wd.wait_for(PASSWORD_INPUT, PAGE_WAIT).await?;
    // the field stays in the DOM but hidden when the identifier was rejected
    if wd.attr(&password_input, "aria-hidden").await?.as_deref() == Some("true") {
        return Err(invalid_identifier);
    }
    wd.send_keys(&password_input, password).await?;
    submit(wd).await?;
    if wd.wait_gone(PASSWORD_INPUT, PAGE_WAIT).await? {
        Ok(())
    } else {
        Err(WebError::InvalidPassword)
    }
}

async fn compose(wd: &WebDriver, contact: &Element, text: &str) -> Result<(), WebError> {
    wd.click(contact).await?;
    let area = wd.wait_for(MESSAGE_AREA, PAGE_WAIT).await?;
    wd.send_keys(&area, text).await?;
    let send = wd.find(SEND_BUTTON).await?;
    wd.click(&send).await?;
    wait_composer_drained(wd, &area).await?;
    Ok(())
}

// The composer emptying is the only visible sign the message was handed off.
// A slow hand-off is not a failure, so the deadline falls through to Ok.
async fn wait_composer_drained(wd: &WebDriver, area: &Element) -> Result<(), WebError> {
    let deadline = tokio::time::Instant::now() + STEP_WAIT;
    loop {
        match wd.prop(area, "value").await?.as_deref() {
            Some("") | None => return Ok(()),
            Some(_) => {}
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
