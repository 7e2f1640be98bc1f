pub(crate) mod check;
pub(crate) mod helpers;
pub(crate) mod run;
pub(crate) mod systems;
