//! linsec-deploy - 主机安全加固部署服务
//!
//! Usage:
//! - Normal mode: `linsec-deploy`
//! - With custom port: `linsec-deploy --port 8080`

use tracing_subscriber::EnvFilter;

use linsec_deploy::RuntimeConfig;

/// 解析命令行参数
fn parse_args() -> RuntimeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = RuntimeConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" if i + 1 < args.len() => {
                config.port_override = args[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    config
}

fn print_help() {
    println!("linsec-deploy - 主机安全加固部署服务");
    println!();
    println!("USAGE:");
    println!("    linsec-deploy [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>    Override the listening port");
    println!("    -h, --help       Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    LINSEC_API_KEY              API key for mutating endpoints");
    println!("    PORT                        Listening port (default 5000)");
    println!("    LINSEC_DATA_DIR             Host store directory");
    println!("    LINSEC_ANSIBLE_DIR          Engine working directory");
    println!("    LINSEC_PLAYBOOKS_DIR        Playbook directory");
    println!("    LINSEC_INVENTORY_DIR        Inventory root directory");
    println!("    LINSEC_LOG_DIR              Run log directory");
    println!("    LINSEC_ENGINE               Engine executable (default ansible-playbook)");
    println!("    LINSEC_DEPLOY_TIMEOUT_SECS  Engine timeout (default 1800)");
    println!("    RUST_LOG                    Log filter");
}

fn main() -> anyhow::Result<()> {
    let config = parse_args();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("linsec_deploy=info".parse()?))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(linsec_deploy::init_and_run_with_config(config))
}
