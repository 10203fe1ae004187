//! Plain-text HTTP response formatting
use std::fmt::Write;

/// The three statuses the service ever answers with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NotFound,
    InternalServerError,
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NotFound => 404,
            Status::InternalServerError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// A status plus a text/plain body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub body: String,
}

impl Response {
    pub fn ok(body: String) -> Self {
        Self { status: Status::Ok, body }
    }

    /// Error responses carry their own status line as body, e.g. "404 Not Found\n".
    pub fn error(status: Status) -> Self {
        let body = format!("{} {}\n", status.code(), status.reason());
        Self { status, body }
    }

    pub fn not_found() -> Self {
        Self::error(Status::NotFound)
    }

    pub fn internal_error() -> Self {
        Self::error(Status::InternalServerError)
    }

    /// Serialize into `out`, replacing its previous contents.
    pub fn write_to(&self, out: &mut String) {
        out.clear();
        // Writing into a String cannot fail
        let _ = write!(
            out,
            "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\n\r\n{}",
            self.status.code(),
            self.status.reason(),
            self.body
        );
    }
}

/// Utilization body: two decimals, percent sign, newline.
pub fn format_utilization(usage: f64) -> String {
    format!("{usage:.2}%\n")
}

/// Hostname body: the name followed by a newline.
pub fn format_hostname(name: &str) -> String {
    let mut body = String::with_capacity(name.len() + 1);
    body.push_str(name);
    body.push('\n');
    body
}
