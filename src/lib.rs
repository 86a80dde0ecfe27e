pub mod messaging;
pub mod node;
pub mod util;
pub mod test_util;
