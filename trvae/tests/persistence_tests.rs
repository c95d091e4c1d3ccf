use candle_core::{Device, Tensor};
use trvae::persistence::model_files;
use trvae::*;

fn toy_model(dir: &std::path::Path, arch: ArchStyle) -> anyhow::Result<Trvae> {
    let conditions = ConditionEncoder::fit(&["ctrl", "stim"]);
    let mut config = TrvaeConfig::new(64, conditions);
    config.arch_style = arch;
    config.z_dim = 3;
    config.mmd_dim = 8;
    config.encoder_layers = vec![16];
    config.image_shape = Some((1, 8, 8));
    Trvae::new(config, Some(dir), &Device::Cpu)
}

fn max_abs_diff(a: &Tensor, b: &Tensor) -> anyhow::Result<f32> {
    Ok((a - b)?.abs()?.max_all()?.to_scalar::<f32>()?)
}

#[test]
fn latent_codes_survive_save_and_load() -> anyhow::Result<()> {
    for arch in [ArchStyle::Dense, ArchStyle::BaselineCnn] {
        let dir = tempfile::tempdir()?;
        let model = toy_model(dir.path(), arch)?;
        model.save()?;
        assert!(model_files(dir.path()).iter().all(|f| f.exists()));

        let loaded = Trvae::load(dir.path(), &Device::Cpu)?;
        assert_eq!(loaded.config(), model.config());

        let x = Tensor::rand(0_f32, 1., (6, 64), &Device::Cpu)?;
        let labels = ["ctrl", "stim", "ctrl", "stim", "stim", "ctrl"];
        let z0 = model.to_latent(&x, &labels)?;
        let z1 = loaded.to_latent(&x, &labels)?;
        assert_eq!(max_abs_diff(&z0, &z1)?, 0.);
    }
    Ok(())
}

#[test]
fn restore_needs_every_artifact() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    toy_model(dir.path(), ArchStyle::Dense)?.save()?;
    std::fs::remove_file(dir.path().join("encoder.safetensors"))?;
    assert!(Trvae::load(dir.path(), &Device::Cpu).is_err());

    let empty = tempfile::tempdir()?;
    assert!(Trvae::load(empty.path(), &Device::Cpu).is_err());
    Ok(())
}

#[test]
fn save_needs_a_model_directory() -> anyhow::Result<()> {
    let conditions = ConditionEncoder::fit(&["a", "b"]);
    let mut config = TrvaeConfig::new(5, conditions);
    config.encoder_layers = vec![4];
    let model = Trvae::new(config, None, &Device::Cpu)?;
    assert!(model.save().is_err());
    Ok(())
}
