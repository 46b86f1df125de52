pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        super_admin_email: String,
        frontend_url: String,
    },
}
