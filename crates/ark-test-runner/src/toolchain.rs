//! Toolchain binaries and the argument lists shared by every invocation.

use std::path::{Path, PathBuf};

use crate::config::RunnerConfig;
use crate::error::ToolchainError;
use crate::process::ToolEnv;

/// Entry point the VM starts from in frontend output.
pub const ENTRY_POINT: &str = "_GLOBAL::func_main_0";

/// Located toolchain
#[derive(Debug, Clone)]
pub struct Toolchain {
    build_dir: PathBuf,
    es2abc: PathBuf,
    ark: PathBuf,
    ark_aot: PathBuf,
    ark_js_vm: Option<PathBuf>,
    cmd_prefix: Vec<String>,
    env: ToolEnv,
    runtime_args: Vec<String>,
    aot_args: Vec<String>,
    ld_library_path: Option<String>,
}

fn require(tool: &'static str, path: &Path) -> Result<(), ToolchainError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ToolchainError::BinaryNotFound {
            tool,
            path: path.to_path_buf(),
        })
    }
}

impl Toolchain {
    /// Locate the frontend in the build directory.
    ///
    /// The VM, AOT compiler and `ark_js_vm` are only checked by the suites
    /// that use them, see [`Toolchain::require_vm`] and friends.
    pub fn locate(config: &RunnerConfig) -> Result<Self, ToolchainError> {
        let build_dir = config.build_dir.clone();
        let es2abc = build_dir.join("es2abc");
        require("es2panda", &es2abc)?;

        let boot_files = format!(
            "--boot-panda-files={}/pandastdlib/arkstdlib.abc",
            build_dir.display()
        );
        let mut runtime_args = vec![
            boot_files,
            "--load-runtimes=ecmascript".to_string(),
            format!("--gc-type={}", config.gc_type),
        ];
        if config.run_gc_in_place {
            runtime_args.push("--run-gc-in-place".to_string());
        }
        let mut aot_args = runtime_args.clone();
        aot_args.extend(config.aot_args.iter().cloned());

        Ok(Self {
            ark: build_dir.join("bin").join("ark"),
            ark_aot: build_dir.join("bin").join("ark_aot"),
            ark_js_vm: config.js_runtime.as_ref().map(|dir| dir.join("ark_js_vm")),
            es2abc,
            build_dir,
            cmd_prefix: config.qemu.map(|q| q.command_prefix()).unwrap_or_default(),
            env: ToolEnv::hardened(),
            runtime_args,
            aot_args,
            ld_library_path: config.ld_library_path.clone(),
        })
    }

    pub fn require_vm(&self) -> Result<(), ToolchainError> {
        require("runtime", &self.ark)
    }

    pub fn require_aot(&self) -> Result<(), ToolchainError> {
        require("aot", &self.ark_aot)
    }

    pub fn require_js_vm(&self, suite: &'static str) -> Result<(), ToolchainError> {
        let path = self
            .ark_js_vm
            .as_ref()
            .ok_or(ToolchainError::NoJsRuntime(suite))?;
        require("ark_js_vm", path)
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn env(&self) -> &ToolEnv {
        &self.env
    }

    /// Environment for `ark_js_vm`, which loads its libraries dynamically.
    pub fn js_vm_env(&self) -> ToolEnv {
        match &self.ld_library_path {
            Some(path) => self.env.clone().with("LD_LIBRARY_PATH", path.clone()),
            None => self.env.clone(),
        }
    }

    fn prefixed(&self, tool: &Path) -> Vec<String> {
        let mut argv = self.cmd_prefix.clone();
        argv.push(tool.display().to_string());
        argv
    }

    /// `es2abc` with the emulator prefix.
    pub fn es2abc(&self) -> Vec<String> {
        self.prefixed(&self.es2abc)
    }

    /// `ark` with the emulator prefix and the shared VM arguments.
    pub fn ark(&self) -> Vec<String> {
        let mut argv = self.prefixed(&self.ark);
        argv.extend(self.runtime_args.iter().cloned());
        argv
    }

    /// `ark_aot` with the emulator prefix and the shared AOT arguments.
    pub fn ark_aot(&self) -> Vec<String> {
        let mut argv = self.prefixed(&self.ark_aot);
        argv.extend(self.aot_args.iter().cloned());
        argv
    }

    /// `ark_js_vm`; it runs natively, never under the emulator.
    pub fn ark_js_vm(&self) -> Vec<String> {
        self.ark_js_vm
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Qemu;
    use tempfile::TempDir;

    fn build_dir_with(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "").unwrap();
        }
        dir
    }

    #[test]
    fn test_missing_frontend_is_fatal() {
        let dir = build_dir_with(&[]);
        let config = RunnerConfig::new(dir.path(), dir.path());
        let err = Toolchain::locate(&config).unwrap_err();
        assert!(err.to_string().starts_with("Cannot find es2panda binary"));
    }

    #[test]
    fn test_optional_binaries_checked_on_demand() {
        let dir = build_dir_with(&["es2abc", "bin/ark"]);
        let config = RunnerConfig::new(dir.path(), dir.path());
        let toolchain = Toolchain::locate(&config).unwrap();
        assert!(toolchain.require_vm().is_ok());
        assert!(toolchain.require_aot().is_err());
        assert!(matches!(
            toolchain.require_js_vm("Compiler"),
            Err(ToolchainError::NoJsRuntime("Compiler"))
        ));
    }

    #[test]
    fn test_vm_arguments() {
        let dir = build_dir_with(&["es2abc"]);
        let mut config = RunnerConfig::new(dir.path(), dir.path());
        config.gc_type = "gen-gc".to_string();
        config.run_gc_in_place = false;
        config.aot_args = vec!["--compiler-regex=.*".to_string()];
        config.qemu = Some(Qemu::Arm64);
        let toolchain = Toolchain::locate(&config).unwrap();

        let ark = toolchain.ark();
        assert_eq!(&ark[..3], &["qemu-aarch64", "-L", "/usr/aarch64-linux-gnu/"]);
        assert!(ark[3].ends_with("bin/ark"));
        assert!(ark.contains(&"--gc-type=gen-gc".to_string()));
        assert!(ark.contains(&"--load-runtimes=ecmascript".to_string()));
        assert!(!ark.contains(&"--run-gc-in-place".to_string()));

        let aot = toolchain.ark_aot();
        assert_eq!(aot.last().unwrap(), "--compiler-regex=.*");
    }

    #[test]
    fn test_js_vm_env_carries_library_path() {
        let dir = build_dir_with(&["es2abc"]);
        let mut config = RunnerConfig::new(dir.path(), dir.path());
        config.ld_library_path = Some("/opt/ark/lib".to_string());
        let toolchain = Toolchain::locate(&config).unwrap();
        assert_eq!(toolchain.js_vm_env().get("LD_LIBRARY_PATH"), Some("/opt/ark/lib"));
        assert_eq!(toolchain.env().get("LD_LIBRARY_PATH"), None);
        assert_eq!(toolchain.env().get("ASAN_OPTIONS"), Some(":exitcode=255"));
    }
}
