//! Typed error taxonomy and its mapping to OSB wire errors and HTTP status
//! codes. One variant per OSB error kind, each carrying its own HTTP status
//! and wire error token.

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        SerdeJ(serde_json::Error);
        SerdeY(serde_yaml::Error);
        Tmpl(tera::Error);
    }

    errors {
        /// Broker configuration is inconsistent for this request.
        ConfigurationError(msg: String) {
            description("configuration error")
            display("configuration error: {}", msg)
        }
        /// Malformed query string or missing required query parameter.
        QueryError(msg: String) {
            description("query error")
            display("query error: {}", msg)
        }
        /// Malformed body or invalid parameter content.
        ParameterError(msg: String) {
            description("parameter error")
            display("parameter error: {}", msg)
        }
        /// JSON-Schema validation failure.
        ValidationError(msg: String) {
            description("validation error")
            display("validation error: {}", msg)
        }
        /// Client did not set `accepts_incomplete=true`.
        AsyncRequired {
            description("async required")
            display("this operation requires asynchronous processing, set accepts_incomplete=true")
        }
        /// Entity exists with incompatible attributes.
        ResourceConflict(msg: String) {
            description("resource conflict")
            display("resource conflict: {}", msg)
        }
        /// Get/update of an absent entity.
        ResourceNotFound(msg: String) {
            description("resource not found")
            display("resource not found: {}", msg)
        }
        /// Delete of an absent entity (OSB semantics: idempotent 410).
        ResourceGone(msg: String) {
            description("resource gone")
            display("resource gone: {}", msg)
        }
        /// Bearer token missing or not an exact match.
        Unauthorized {
            description("unauthorized")
            display("unauthorized")
        }
        /// `X-Broker-API-Version` below the minimum the broker supports.
        Unsupported(msg: String) {
            description("unsupported broker api version")
            display("unsupported broker api version: {}", msg)
        }
        /// Everything else.
        Internal(msg: String) {
            description("internal server error")
            display("internal server error: {}", msg)
        }
    }
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::ConfigurationError(_) => 400,
            ErrorKind::QueryError(_) => 400,
            ErrorKind::ParameterError(_) => 400,
            ErrorKind::ValidationError(_) => 400,
            ErrorKind::AsyncRequired => 422,
            ErrorKind::ResourceConflict(_) => 409,
            ErrorKind::ResourceNotFound(_) => 404,
            ErrorKind::ResourceGone(_) => 410,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Unsupported(_) => 412,
            ErrorKind::Internal(_) => 500,
            _ => 500,
        }
    }

    /// OSB `error` token for the wire envelope, or `None` for bare-HTTP kinds
    /// (`Unauthorized`, `Unsupported`) which carry no JSON body.
    pub fn osb_token(&self) -> Option<&'static str> {
        match self {
            ErrorKind::ConfigurationError(_) => Some("ConfigurationError"),
            ErrorKind::QueryError(_) => Some("QueryError"),
            ErrorKind::ParameterError(_) => Some("ParameterError"),
            ErrorKind::ValidationError(_) => Some("ValidationError"),
            ErrorKind::AsyncRequired => Some("AsyncRequired"),
            ErrorKind::ResourceConflict(_) => Some("ResourceConflict"),
            ErrorKind::ResourceNotFound(_) => Some("ResourceNotFound"),
            ErrorKind::ResourceGone(_) => Some("ResourceGone"),
            ErrorKind::Unauthorized => None,
            ErrorKind::Unsupported(_) => None,
            ErrorKind::Internal(_) => Some("InternalServerError"),
            _ => Some("InternalServerError"),
        }
    }

    /// True for kinds worth a bounded retry inside an in-flight async
    /// operation: resource-store failures during async operations are
    /// retried a bounded number of times, transient kinds only.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Internal(_))
    }
}

impl Error {
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    pub fn osb_token(&self) -> Option<&'static str> {
        self.kind().osb_token()
    }
}
