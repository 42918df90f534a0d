use http::Response;

/// A response head: status, version and headers, no body attached yet.
pub type ResponseHead = Response<()>;
