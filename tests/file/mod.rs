mod lifecycle;
mod read_path;
mod seek;
