mod connection;
mod coupling;
