pub(crate) mod codec;
pub(crate) mod req_body;
pub(crate) mod request;
pub(crate) mod response;
