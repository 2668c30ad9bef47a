// build.rs
// Compiles the cube's GLSL shaders to SPIR-V with glslc

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Locate glslc through VULKAN_SDK first, then PATH
fn find_glslc() -> Option<PathBuf> {
    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let candidate = if cfg!(target_os = "windows") {
            PathBuf::from(format!("{}\\Bin\\glslc.exe", sdk))
        } else {
            PathBuf::from(format!("{}/bin/glslc", sdk))
        };
        if candidate.exists() {
            return Some(candidate);
        }
        eprintln!("warning: glslc not found at: {:?}", candidate);
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join("glslc"))
        .find(|candidate| candidate.exists())
}

fn compile_shader(glslc: &Path, source: &Path, target_dir: &Path) -> bool {
    let Some(file_name) = source.file_name() else {
        return false;
    };
    // vkcube.vert -> vkcube.vert.spv, so both stages can share a stem
    let out_file = target_dir.join(format!("{}.spv", file_name.to_string_lossy()));

    let needs_compile = match (std::fs::metadata(source), std::fs::metadata(&out_file)) {
        (Ok(src_meta), Ok(dst_meta)) => match (src_meta.modified(), dst_meta.modified()) {
            (Ok(src), Ok(dst)) => src > dst,
            _ => true,
        },
        _ => true,
    };

    if !needs_compile {
        eprintln!("info: Shader {:?} is up to date", file_name);
        return false;
    }

    let status = Command::new(glslc)
        .arg(source)
        .arg("-o")
        .arg(&out_file)
        .status();

    match status {
        Ok(s) if s.success() => {
            eprintln!("info: Compiled {:?} -> {:?}", source, out_file);
            true
        }
        Ok(s) => {
            eprintln!("error: glslc failed for {:?} with exit code: {}", source, s.code().unwrap_or(-1));
            panic!("Shader compilation failed");
        }
        Err(e) => {
            eprintln!("error: Failed to run glslc for {:?}: {}", source, e);
            panic!("Failed to execute shader compiler");
        }
    }
}

fn main() {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let workspace_root = manifest_dir.join("../..");
    let shader_dir = workspace_root.join("resources/shaders");
    let target_dir = workspace_root.join("target/shaders");

    println!("cargo:rerun-if-changed={}", shader_dir.display());
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Some(glslc) = find_glslc() else {
        eprintln!("warning: glslc not found, shader compilation skipped");
        eprintln!("hint: Install the Vulkan SDK or put glslc on PATH");
        return;
    };

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create target directory: {}", e);
        return;
    }

    let mut compiled_count = 0;
    for stage in ["vkcube.vert", "vkcube.frag"] {
        if compile_shader(&glslc, &shader_dir.join(stage), &target_dir) {
            compiled_count += 1;
        }
    }

    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled_count);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
