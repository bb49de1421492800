//! Public ECR (`public.ecr.aws/<alias>`), served from us-east-1 only

repository_api!(aws_sdk_ecrpublic);
