use anyhow::Result;

use warpgate_lib::config::GlobalConfig;
use warpgate_lib::consts::VERSION;
use warpgate_lib::platform::arch::{detect_strategy, host_arch, normalize_arch};
use warpgate_lib::platform::host_platform;
use warpgate_lib::platform::paths::{cache_dir, digests_dir, global_config_path};

use crate::output::{OutputFormat, print_json, print_stat};

pub fn cmd_info(global: &GlobalConfig, output: OutputFormat) -> Result<()> {
  let host = host_arch();
  let strategies: Vec<(String, &'static str)> = global
    .build
    .default_arch
    .iter()
    .map(|arch| (arch.clone(), detect_strategy(&host, arch).as_str()))
    .collect();

  if output.is_json() {
    let json = serde_json::json!({
      "version": VERSION,
      "platform": host_platform(),
      "architecture": normalize_arch(&host),
      "config": global_config_path(),
      "digests": digests_dir(),
      "cache": cache_dir(),
      "registry": global.registry.default,
      "concurrency": global.concurrency(),
      "strategies": strategies
        .iter()
        .map(|(arch, strategy)| serde_json::json!({ "arch": arch, "strategy": strategy }))
        .collect::<Vec<_>>(),
    });
    return print_json(&json);
  }

  println!("System:");
  print_stat("Version", VERSION);
  print_stat("Platform", &host_platform());
  print_stat("Architecture", normalize_arch(&host));
  println!();
  println!("Paths:");
  print_stat("Config", &global_config_path().display().to_string());
  print_stat("Digests", &digests_dir().display().to_string());
  print_stat("Cache", &cache_dir().display().to_string());
  println!();
  println!("Build defaults:");
  print_stat("Registry", &global.registry.default);
  print_stat("Concurrency", &global.concurrency().to_string());
  for (arch, strategy) in &strategies {
    print_stat(arch, strategy);
  }

  Ok(())
}
