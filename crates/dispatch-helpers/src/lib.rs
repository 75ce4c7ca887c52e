pub mod de;
pub mod logging;
pub mod secret;
pub mod shutdown;
