mod grbl;
mod limits;
mod mock;
