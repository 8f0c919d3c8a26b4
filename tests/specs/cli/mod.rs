mod help;
mod signals;
