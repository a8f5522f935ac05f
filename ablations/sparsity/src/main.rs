//! 稀疏度消融实验: 比较不同切片间隔下的体重建误差.

mod profile;
mod result;
mod runner;

fn main() {
    simple_logger::init_with_level(log::Level::Info).unwrap();
    runner::run().analyze();
}
