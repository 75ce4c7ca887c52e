mod consumer;
mod render;
mod transport;

pub use consumer::DispatchConsumer;
pub use render::TemplateRenderer;
pub use transport::{SmtpMailTransport, TlsMode};
