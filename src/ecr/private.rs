//! Private ECR (`<account>.dkr.ecr.<region>.amazonaws.com`)

repository_api!(aws_sdk_ecr);
