mod impls;
mod oraculo;
mod payment;
mod requests;
mod responses;
mod util;

pub use self::oraculo::*;
pub use impls::*;
pub use payment::*;
pub use requests::*;
pub use responses::*;
pub use util::*;
