// Compiles GLSL under resources/shaders to SPIR-V in <workspace>/target/shaders

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 6] = ["vert", "frag", "comp", "geom", "tesc", "tese"];

/// `model.vert` becomes `model.vert.spv` so stages sharing a stem don't collide
fn output_path(source: &Path, target_dir: &Path) -> Option<PathBuf> {
    let file_name = source.file_name()?.to_str()?;
    Some(target_dir.join(format!("{file_name}.spv")))
}

fn is_stale(source: &Path, output: &Path) -> bool {
    match (
        std::fs::metadata(source).and_then(|m| m.modified()),
        std::fs::metadata(output).and_then(|m| m.modified()),
    ) {
        (Ok(src), Ok(dst)) => src > dst,
        _ => true,
    }
}

fn compile_dir(shader_dir: &Path, target_dir: &Path, glslc: &Path, compiled: &mut usize) {
    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at: {}", shader_dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            compile_dir(&path, target_dir, glslc, compiled);
            continue;
        }

        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_STAGES.contains(&ext));
        if !is_stage {
            continue;
        }

        let Some(out_file) = output_path(&path, target_dir) else {
            eprintln!("warning: Skipping shader with a non UTF-8 name: {}", path.display());
            continue;
        };

        if !is_stale(&path, &out_file) {
            eprintln!("info: Shader {} is up to date", path.display());
            continue;
        }

        let status = Command::new(glslc)
            .arg("-I")
            .arg(shader_dir)
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status();

        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {} -> {}", path.display(), out_file.display());
                *compiled += 1;
            }
            Ok(s) => panic!(
                "glslc failed for {} with exit code {}",
                path.display(),
                s.code().unwrap_or(-1)
            ),
            Err(e) => panic!("Failed to run glslc for {}: {e}", path.display()),
        }
    }
}

/// glslc from the Vulkan SDK, else whatever is on PATH
fn find_glslc() -> Option<PathBuf> {
    let exe = if cfg!(target_os = "windows") { "glslc.exe" } else { "glslc" };

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let bin = if cfg!(target_os = "windows") { "Bin" } else { "bin" };
        let candidate = Path::new(&sdk).join(bin).join(exe);
        if candidate.exists() {
            return Some(candidate);
        }
        eprintln!("warning: glslc not found at {}", candidate.display());
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(exe))
            .find(|candidate| candidate.exists())
    })
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var_os("SKIP_SHADERS").is_some() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Some(glslc) = find_glslc() else {
        eprintln!("warning: glslc not found, shader compilation skipped");
        eprintln!("hint: Install the Vulkan SDK and set VULKAN_SDK");
        return;
    };

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".into()));
    let shader_dir = manifest_dir.join("resources").join("shaders");
    let workspace_root = manifest_dir.parent().unwrap_or(&manifest_dir).to_path_buf();
    let target_dir = workspace_root.join("target").join("shaders");

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create {}: {e}", target_dir.display());
        return;
    }

    let mut compiled = 0;
    compile_dir(&shader_dir, &target_dir, &glslc, &mut compiled);

    if compiled > 0 {
        eprintln!("info: Compiled {compiled} shader(s) into {}", target_dir.display());
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
