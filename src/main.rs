fn main() {
    pennywise_lib::run()
}
