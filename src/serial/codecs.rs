/// Splits incoming bytes into lines and terminates outgoing ones.
pub(crate) mod lines;
