#[cfg(test)]
mod tests
{
	use color_eyre::eyre::Result;

	use bmputil::probe_identity::{GitVersion, Probe, ProbeIdentity, VersionKind, VersionNumber, VersionParts};

	#[test]
	fn extract_native() -> Result<()>
	{
		let res: ProbeIdentity = String::from("Black Magic Probe v2.0.0-rc2").try_into()?;

		assert_eq!(res.variant(), Probe::Native);
		assert_eq!(
			res.version,
			VersionNumber::FullVersion(VersionParts::from_parts(2, 0, 0, VersionKind::ReleaseCandidate(2), false))
		);
		Ok(())
	}

	#[test]
	fn extract_old() -> Result<()>
	{
		let res: ProbeIdentity = String::from("Black Magic Probe").try_into()?;

		assert_eq!(res.variant(), Probe::Native);
		assert_eq!(res.version, VersionNumber::Unknown);
		Ok(())
	}

	#[test]
	fn extract_development_build() -> Result<()>
	{
		let res: ProbeIdentity = String::from("Black Magic Probe v2.0.0-rc2-65-g221c3031f").try_into()?;

		assert_eq!(res.variant(), Probe::Native);
		assert_eq!(
			res.version,
			VersionNumber::FullVersion(VersionParts::from_parts(
				2,
				0,
				0,
				VersionKind::Development(GitVersion::from_parts(Some(2), 65, String::from("g221c3031f"))),
				false,
			))
		);
		Ok(())
	}

	#[test]
	fn extract_bare_git_hash() -> Result<()>
	{
		let res: ProbeIdentity = String::from("Black Magic Probe g221c3031f").try_into()?;

		assert_eq!(res.variant(), Probe::Native);
		assert_eq!(res.version, VersionNumber::GitHash(String::from("221c3031f")));
		Ok(())
	}

	#[test]
	fn extract_st_link() -> Result<()>
	{
		let res: ProbeIdentity = String::from("Black Magic Probe (ST-Link/v2) v1.10.0-1273-g2b1ce9aee").try_into()?;

		assert_eq!(res.variant(), Probe::Stlink);
		assert_eq!(
			res.version,
			VersionNumber::FullVersion(VersionParts::from_parts(
				1,
				10,
				0,
				VersionKind::Development(GitVersion::from_parts(None, 1273, String::from("g2b1ce9aee"))),
				false,
			))
		);
		Ok(())
	}

	#[test]
	fn extract_without_closing_parenthesis()
	{
		let result: Result<ProbeIdentity> = "Black Magic Probe (ST-Link".to_string().try_into();

		assert!(result.is_err());
		if let Err(err) = result {
			assert_eq!(err.to_string(), "Error while parsing probe string: Not a matching pair of parenthesis found.");
		}
	}

	#[test]
	fn unrecognised_product_string()
	{
		let result: Result<ProbeIdentity> = String::from("Something (v1.2.3)").try_into();

		assert!(result.is_err());
		if let Err(err) = result {
			assert_eq!(err.to_string(), "Product string doesn't start with 'Black Magic Probe'");
		}
	}
}
