mod common;

use anyhow::Result;
use cassa::io::Exporter;
use chrono::Utc;
use common::{StandardLocations, create_source_tables, insert_invoice, raw_pool, test_service};

#[tokio::test]
async fn test_export_movements_csv_resolves_location_names() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;
    locations.fund_register(&service, 100000).await?;
    service
        .record_transfer(
            locations.register.id,
            locations.bank.id,
            40000,
            Utc::now(),
            Some("end of day".into()),
            "u1",
        )
        .await?;

    let exporter = Exporter::new(&service);
    let mut buffer = Vec::new();
    let count = exporter.export_movements_csv(&mut buffer).await?;

    assert_eq!(count, 2);
    let csv = String::from_utf8(buffer)?;
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("id,movement_date,movement_type"));
    assert!(csv.contains("Cash Register"));
    assert!(csv.contains("Bank Account"));
    assert!(csv.contains("400.00"));
    Ok(())
}

#[tokio::test]
async fn test_export_balances_and_summaries_csv() -> Result<()> {
    let (service, temp) = test_service().await?;
    let locations = StandardLocations::create(&service).await?;
    locations.fund_register(&service, 25000).await?;

    let pool = raw_pool(&temp).await?;
    create_source_tables(&pool).await?;
    insert_invoice(&pool, "INV-1", "2025-01-10", "paid", 100000, &[(30000, 1)]).await?;
    service.calculate_for_month("2025-01".parse()?).await?;

    let exporter = Exporter::new(&service);

    let mut balances = Vec::new();
    let count = exporter.export_balances_csv(&mut balances).await?;
    assert_eq!(count, 3);
    let balances = String::from_utf8(balances)?;
    assert!(balances.contains("Cash Register,cash,250.00"));

    let mut summaries = Vec::new();
    let count = exporter.export_summaries_csv(&mut summaries).await?;
    assert_eq!(count, 1);
    let summaries = String::from_utf8(summaries)?;
    assert!(summaries.contains("2025-01,1000.00,300.00,0.00,700.00,700.00,70.00,1,0"));
    Ok(())
}
