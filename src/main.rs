fn main() {
    tabletop_scene::cli::run();
}
